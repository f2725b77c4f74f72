use clap::{App, Arg};
use tankd::config::DaemonConfig;
use tankd::daemon::{Daemon, Hardware};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("tankd")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Tank Robotics Team")
        .about("Onboard control daemon for the tracked robot")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("command-bind")
                .long("command-bind")
                .value_name("ADDR")
                .help("Command channel listen address")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("video-bind")
                .long("video-bind")
                .value_name("ADDR")
                .help("Video channel listen address")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("lidar-port")
                .long("lidar-port")
                .value_name("PATH")
                .help("Serial device of the TF-Mini-S LiDAR")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("no-lidar")
                .long("no-lidar")
                .help("Run without the LiDAR worker (no obstacle limiting)"),
        )
        .arg(
            Arg::with_name("no-gamepad")
                .long("no-gamepad")
                .help("Run without gamepad ingestion and control"),
        )
        .arg(
            Arg::with_name("deadzone")
                .long("deadzone")
                .value_name("FRACTION")
                .help("Gamepad stick deadzone")
                .takes_value(true)
                .validator(|v| match v.parse::<f32>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Deadzone must be a number".into()),
                }),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .multiple(true)
                .help("Increase log verbosity (-v debug, -vv trace)"),
        )
        .get_matches();

    let mut config = match matches.value_of("config") {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };

    if let Some(addr) = matches.value_of("command-bind") {
        config.network.command_bind = addr.to_string();
    }
    if let Some(addr) = matches.value_of("video-bind") {
        config.network.video_bind = addr.to_string();
    }
    if let Some(port) = matches.value_of("lidar-port") {
        config.lidar.port = port.to_string();
    }
    if matches.is_present("no-lidar") {
        config.lidar.enabled = false;
    }
    if matches.is_present("no-gamepad") {
        config.gamepad.enabled = false;
    }
    if let Some(deadzone) = matches.value_of("deadzone") {
        config.gamepad.deadzone = deadzone.parse()?;
    }

    let level = match matches.occurrences_of("verbose") {
        0 => config.log_level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_max_level(level.parse().unwrap_or(tracing::Level::INFO))
        .init();

    let mut daemon = Daemon::new(config, Hardware::simulated())?;
    daemon.bind_transport().await?;
    daemon.start_workers()?;
    info!("tankd running, press Ctrl+C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
    }

    tokio::task::block_in_place(|| daemon.shutdown());
    Ok(())
}
