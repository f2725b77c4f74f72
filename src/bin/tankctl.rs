use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use std::time::Duration;
use tankd::arbiter::MotorCommand;
use tankd::led::{LedCommand, Rgb};
use tankd::mode::{ActionReply, ActionRequest, ModeRequest};
use tankd::protocol::{self, Command, Reply};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "5003";
const REPLY_TIMEOUT: Duration = Duration::from_secs(3);

fn int_validator(v: String) -> Result<(), String> {
    v.parse::<i32>()
        .map(|_| ())
        .map_err(|_| format!("'{}' is not an integer", v))
}

fn int_arg(name: &'static str, help: &'static str) -> Arg<'static, 'static> {
    Arg::with_name(name)
        .help(help)
        .required(true)
        .allow_hyphen_values(true)
        .validator(int_validator)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("tankctl")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Tank Robotics Team")
        .about("Operator client for the tankd command channel")
        .global_setting(AppSettings::AllowNegativeNumbers)
        .arg(
            Arg::with_name("host")
                .short("H")
                .long("host")
                .value_name("HOST")
                .help("Daemon host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Command channel port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["table", "compact", "raw"])
                .default_value("table")
                .global(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable verbose output")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("motor")
                .about("Drive both tracks (-4095..4095)")
                .arg(int_arg("left", "Left track speed"))
                .arg(int_arg("right", "Right track speed")),
        )
        .subcommand(SubCommand::with_name("stop").about("Stop both tracks"))
        .subcommand(
            SubCommand::with_name("servo")
                .about("Set a servo angle")
                .arg(
                    Arg::with_name("channel")
                        .help("Servo channel")
                        .required(true)
                        .possible_values(&["0", "1"]),
                )
                .arg(int_arg("angle", "Angle in degrees (0-180)")),
        )
        .subcommand(
            SubCommand::with_name("led")
                .about("Set the LED pattern (0 off, 1 solid, 2 wipe, 3 blink, 4 breathe, 5 rainbow)")
                .arg(int_arg("mode", "Pattern id"))
                .arg(int_arg("r", "Red (0-255)"))
                .arg(int_arg("g", "Green (0-255)"))
                .arg(int_arg("b", "Blue (0-255)"))
                .arg(int_arg("mask", "Pixel bitmask for solid mode")),
        )
        .subcommand(
            SubCommand::with_name("mode")
                .about("Change the operating mode")
                .arg(
                    Arg::with_name("mode")
                        .required(true)
                        .possible_values(&["free", "sonic", "line"]),
                ),
        )
        .subcommand(
            SubCommand::with_name("action")
                .about("Run a gripper action and wait for completion")
                .arg(
                    Arg::with_name("action")
                        .required(true)
                        .possible_values(&["stop", "up", "down"]),
                ),
        )
        .subcommand(SubCommand::with_name("sonic").about("Request one ultrasonic reading"))
        .subcommand(
            SubCommand::with_name("monitor")
                .about("Print replies broadcast by the daemon")
                .arg(
                    Arg::with_name("duration")
                        .short("d")
                        .long("duration")
                        .value_name("SECONDS")
                        .help("Stop after this many seconds")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("raw")
                .about("Send a raw protocol line")
                .arg(Arg::with_name("line").required(true)),
        )
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST).to_string();
    let port = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse::<u16>()?;
    let format = matches.value_of("format").unwrap_or("table").to_string();
    let verbose = matches.is_present("verbose");

    if verbose {
        println!("{}", "tankctl".bright_blue().bold());
        println!("{} {}:{}", "Connecting to".dimmed(), host, port);
    }

    let client = Client { host, port, format, verbose };

    match matches.subcommand() {
        ("motor", Some(sub)) => {
            let cmd = MotorCommand::new(int_value(sub, "left")?, int_value(sub, "right")?);
            client.send(Command::Motor(cmd)).await?;
        }
        ("stop", _) => client.send(Command::Motor(MotorCommand::STOP)).await?,
        ("servo", Some(sub)) => {
            let channel = int_value(sub, "channel")? as u8;
            let angle = int_value(sub, "angle")?;
            client.send(Command::Servo { channel, angle }).await?;
        }
        ("led", Some(sub)) => {
            let byte = |name: &str| -> Result<u8, Box<dyn std::error::Error>> {
                Ok(u8::try_from(int_value(sub, name)?)?)
            };
            let led = LedCommand::new(
                int_value(sub, "mode")?,
                Rgb::new(byte("r")?, byte("g")?, byte("b")?),
                byte("mask")?,
            );
            client.send(Command::Led(led)).await?;
        }
        ("mode", Some(sub)) => {
            let request = match sub.value_of("mode") {
                Some("sonic") => ModeRequest::Ultrasonic,
                Some("line") => ModeRequest::LineFollow,
                _ => ModeRequest::Free,
            };
            client.send(Command::Mode(request)).await?;
        }
        ("action", Some(sub)) => {
            let action = match sub.value_of("action") {
                Some("up") => ActionRequest::Up,
                Some("down") => ActionRequest::Down,
                _ => ActionRequest::Stop,
            };
            client.request(Command::Action(action), |reply| matches!(reply, Reply::Action(_))).await?;
        }
        ("sonic", _) => {
            client
                .request(Command::SonicRequest, |reply| matches!(reply, Reply::Sonic { .. }))
                .await?;
        }
        ("monitor", Some(sub)) => {
            let duration = sub
                .value_of("duration")
                .map(|d| d.parse::<u64>().map(Duration::from_secs))
                .transpose()?;
            client.monitor(duration).await?;
        }
        ("raw", Some(sub)) => {
            let line = sub.value_of("line").unwrap_or_default();
            client.send_line(line).await?;
        }
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
            println!("{}", "Quick start:".bright_green());
            println!("  {} Drive forward", "tankctl motor 1500 1500".bright_cyan());
            println!("  {} Stop", "tankctl stop".bright_cyan());
            println!("  {} Watch replies", "tankctl monitor".bright_cyan());
        }
    }

    Ok(())
}

fn int_value(matches: &ArgMatches<'_>, name: &str) -> Result<i32, Box<dyn std::error::Error>> {
    let raw = matches
        .value_of(name)
        .ok_or_else(|| format!("missing argument {}", name))?;
    Ok(raw.parse::<i32>()?)
}

struct Client {
    host: String,
    port: u16,
    format: String,
    verbose: bool,
}

impl Client {
    async fn connect(&self) -> Result<TcpStream, Box<dyn std::error::Error>> {
        let addr = format!("{}:{}", self.host, self.port);
        match TcpStream::connect(&addr).await {
            Ok(stream) => Ok(stream),
            Err(e) => {
                eprintln!("{} Failed to connect to tankd at {}", "❌".red(), addr.bright_white());
                if e.kind() == std::io::ErrorKind::ConnectionRefused {
                    eprintln!("{} Daemon is not running. Start it with:", "💡".yellow());
                    eprintln!("   {}", "tankd".bright_cyan());
                } else {
                    eprintln!("{} Network error: {}", "🔌".yellow(), e.to_string().bright_red());
                }
                Err(e.into())
            }
        }
    }

    async fn send(&self, command: Command) -> Result<(), Box<dyn std::error::Error>> {
        let line = protocol::encode(&command)?;
        self.send_line(&line).await
    }

    async fn send_line(&self, line: &str) -> Result<(), Box<dyn std::error::Error>> {
        let mut stream = self.connect().await?;
        stream.write_all(line.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        stream.flush().await?;

        match self.format.as_str() {
            "raw" => println!("{}", line),
            "compact" => println!("{}", "OK".bright_green()),
            _ => println!("{} {}", "✅".green(), format!("Sent {}", line).bright_green()),
        }
        Ok(())
    }

    /// Send `command` and wait for the first reply accepted by `wanted`.
    async fn request<F>(&self, command: Command, wanted: F) -> Result<(), Box<dyn std::error::Error>>
    where
        F: Fn(&Reply) -> bool,
    {
        let line = protocol::encode(&command)?;
        let stream = self.connect().await?;
        let (reader, mut writer) = stream.into_split();
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;

        if self.verbose {
            println!("{} {}", "Sent".dimmed(), line);
        }

        let mut lines = BufReader::new(reader).lines();
        let waited = tokio::time::timeout(REPLY_TIMEOUT, async {
            while let Some(text) = lines.next_line().await? {
                if let Ok(reply) = protocol::parse_reply(&text) {
                    if wanted(&reply) {
                        return Ok::<_, std::io::Error>(Some((text, reply)));
                    }
                }
            }
            Ok(None)
        })
        .await;

        match waited {
            Ok(Ok(Some((text, reply)))) => {
                self.print_reply(&text, &reply);
                Ok(())
            }
            Ok(Ok(None)) => {
                eprintln!("{} Daemon closed the connection", "❌".red());
                Err("connection closed".into())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                eprintln!("{} No reply within {:?}", "⏰".yellow(), REPLY_TIMEOUT);
                Err("reply timeout".into())
            }
        }
    }

    async fn monitor(&self, duration: Option<Duration>) -> Result<(), Box<dyn std::error::Error>> {
        let stream = self.connect().await?;
        let mut lines = BufReader::new(stream).lines();

        if self.format == "table" {
            println!("{}", "┌───────────┬──────────────────────┐".bright_white());
            println!("{}", "│ Kind      │ Value                │".bright_white());
            println!("{}", "├───────────┼──────────────────────┤".bright_white());
        }

        let watch = async {
            while let Some(text) = lines.next_line().await? {
                match protocol::parse_reply(&text) {
                    Ok(reply) => self.print_reply(&text, &reply),
                    Err(_) if self.format == "raw" => println!("{}", text),
                    Err(_) => {}
                }
            }
            Ok::<_, std::io::Error>(())
        };

        match duration {
            Some(limit) => {
                // Elapsed just means the monitoring window is over.
                if let Ok(result) = tokio::time::timeout(limit, watch).await {
                    result?;
                }
            }
            None => watch.await?,
        }
        Ok(())
    }

    fn print_reply(&self, text: &str, reply: &Reply) {
        match self.format.as_str() {
            "raw" => println!("{}", text),
            "compact" => match reply {
                Reply::Sonic { distance_cm } => println!("{:.2}", distance_cm),
                Reply::Action(action) => println!("{}", action.wire()),
            },
            _ => match reply {
                Reply::Sonic { distance_cm } => {
                    let value = format!("{:>8.2} cm", distance_cm);
                    let value = if *distance_cm < 10.0 {
                        value.bright_red()
                    } else if *distance_cm < 40.0 {
                        value.yellow()
                    } else {
                        value.green()
                    };
                    println!("│ {:<9} │ {:<20} │", "sonic", value);
                }
                Reply::Action(action) => {
                    let label = match action {
                        ActionReply::Stopped => "stopped",
                        ActionReply::UpComplete => "up complete",
                        ActionReply::DownComplete => "down complete",
                    };
                    println!("│ {:<9} │ {:<20} │", "action", label.bright_green());
                }
            },
        }
    }
}
