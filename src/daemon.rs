//! Daemon wiring: shared state, router, workers and transport.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::car_task::{CarTask, CarTaskTiming};
use crate::config::{ConfigError, DaemonConfig};
use crate::gamepad::{GamepadBackend, GamepadController, GamepadReader};
use crate::hardware::{
    SharedCamera, SharedCar, SharedLedStrip, SimulatedCamera, SimulatedCar, SimulatedLedStrip,
};
use crate::led::{LedCommand, LedConsumer, LedRenderer, LedTiming};
use crate::lidar::{LidarWorker, SerialRangeSensor};
use crate::net::{CommandServer, VideoServer, REPLY_BROADCAST_CAPACITY};
use crate::protocol::CommandLine;
use crate::router::{CommandReceiver, CommandRouter};
use crate::state::SharedState;
use crate::supervisor::{StopOutcome, SupervisorError, WorkerKind, WorkerSupervisor};
use crate::video::{VideoClient, VideoWorker};

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

/// Hardware collaborators the daemon drives.
pub struct Hardware {
    pub car: SharedCar,
    pub leds: SharedLedStrip,
    pub camera: SharedCamera,
    /// Called each time the gamepad reader starts.
    pub gamepad_backend: fn() -> Box<dyn GamepadBackend>,
}

impl Hardware {
    pub fn simulated() -> Self {
        Self {
            car: SimulatedCar::new().into_shared(),
            leds: SimulatedLedStrip::default().into_shared(),
            camera: SimulatedCamera::new().into_shared(),
            gamepad_backend: crate::gamepad::device::default_backend,
        }
    }
}

pub struct Daemon {
    config: DaemonConfig,
    state: Arc<SharedState>,
    router: CommandRouter,
    hardware: Hardware,
    supervisor: WorkerSupervisor,
    led_queue: Receiver<LedCommand>,
    inbound_tx: Sender<CommandLine>,
    inbound_rx: Receiver<CommandLine>,
    video_tx: Sender<VideoClient>,
    video_rx: Receiver<VideoClient>,
    replies: broadcast::Sender<String>,
    transport: Vec<JoinHandle<()>>,
    command_addr: Option<SocketAddr>,
    video_addr: Option<SocketAddr>,
}

impl Daemon {
    pub fn new(config: DaemonConfig, hardware: Hardware) -> Result<Self, DaemonError> {
        config.validate()?;

        let state = SharedState::shared();
        let (led_tx, led_queue) = unbounded();
        let (inbound_tx, inbound_rx) = unbounded();
        let (video_tx, video_rx) = unbounded();
        let (replies, _) = broadcast::channel(REPLY_BROADCAST_CAPACITY);

        let router = CommandRouter::new(
            Arc::clone(&state),
            Arc::clone(&hardware.car),
            led_tx,
            replies.clone(),
        );

        Ok(Self {
            supervisor: WorkerSupervisor::new(config.stop_timeout()),
            config,
            state,
            router,
            hardware,
            led_queue,
            inbound_tx,
            inbound_rx,
            video_tx,
            video_rx,
            replies,
            transport: Vec::new(),
            command_addr: None,
            video_addr: None,
        })
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    pub fn router(&self) -> &CommandRouter {
        &self.router
    }

    pub fn supervisor(&self) -> &WorkerSupervisor {
        &self.supervisor
    }

    /// Sender the transport uses for inbound lines; also handy for local injection.
    pub fn inbound(&self) -> Sender<CommandLine> {
        self.inbound_tx.clone()
    }

    pub fn subscribe_replies(&self) -> broadcast::Receiver<String> {
        self.replies.subscribe()
    }

    pub fn command_addr(&self) -> Option<SocketAddr> {
        self.command_addr
    }

    pub fn video_addr(&self) -> Option<SocketAddr> {
        self.video_addr
    }

    /// Bind both TCP channels and spawn their accept loops on the current runtime.
    pub async fn bind_transport(&mut self) -> Result<(), DaemonError> {
        let command_bind = self.config.network.command_bind.clone();
        let commands = CommandServer::bind(&command_bind, self.inbound_tx.clone(), self.replies.clone())
            .await
            .map_err(|source| DaemonError::Bind {
                addr: command_bind.clone(),
                source,
            })?;

        let video_bind = self.config.network.video_bind.clone();
        let video = VideoServer::bind(&video_bind, self.video_tx.clone())
            .await
            .map_err(|source| DaemonError::Bind {
                addr: video_bind.clone(),
                source,
            })?;

        self.command_addr = commands.local_addr().ok();
        self.video_addr = video.local_addr().ok();
        self.transport.push(tokio::spawn(commands.serve()));
        self.transport.push(tokio::spawn(video.serve()));
        Ok(())
    }

    /// Start every worker. Workers already running are left alone.
    pub fn start_workers(&mut self) -> Result<(), DaemonError> {
        if self.config.lidar.enabled {
            let config = self.config.lidar.clone();
            let state = Arc::clone(&self.state);
            self.supervisor.start(WorkerKind::Lidar, move |flag| {
                match SerialRangeSensor::open(&config) {
                    Ok(sensor) => LidarWorker::new(sensor, state, &config).run(flag),
                    Err(e) => warn!("LiDAR disabled for this session: {}", e),
                }
            })?;
        } else {
            info!("LiDAR disabled by configuration");
        }

        if self.config.gamepad.enabled {
            let reader = GamepadReader::new(
                (self.hardware.gamepad_backend)(),
                Arc::clone(&self.state),
                self.config.gamepad.deadzone,
                self.config.gamepad.reconnect_delay(),
            );
            self.supervisor
                .start(WorkerKind::GamepadReader, move |flag| reader.run(flag))?;

            let controller = GamepadController::new(self.router.clone(), self.config.gamepad.clone());
            self.supervisor
                .start(WorkerKind::GamepadControl, move |flag| controller.run(flag))?;
        } else {
            info!("Gamepad disabled by configuration");
        }

        let consumer = LedConsumer::new(
            self.led_queue.clone(),
            LedRenderer::new(Arc::clone(&self.hardware.leds), LedTiming::default()),
        );
        self.supervisor
            .start(WorkerKind::LedConsumer, move |flag| consumer.run(flag))?;

        let car_task = CarTask::new(self.router.clone(), CarTaskTiming::default());
        self.supervisor
            .start(WorkerKind::CarTask, move |flag| car_task.run(flag))?;

        let video = VideoWorker::new(self.video_rx.clone(), Arc::clone(&self.hardware.camera))
            .with_frame_pause(self.config.network.video_frame_pause());
        self.supervisor
            .start(WorkerKind::VideoSend, move |flag| video.run(flag))?;

        let receiver = CommandReceiver::new(self.inbound_rx.clone(), self.router.clone());
        self.supervisor
            .start(WorkerKind::CommandReceive, move |flag| receiver.run(flag))?;

        Ok(())
    }

    /// Stop workers in order, close the transport, then park the actuators.
    pub fn shutdown(&mut self) -> Vec<(WorkerKind, StopOutcome)> {
        info!("Shutting down");
        let outcomes = self.supervisor.stop_all();

        for task in self.transport.drain(..) {
            task.abort();
        }

        if let Err(e) = self.hardware.car.lock().shutdown() {
            warn!("Car shutdown failed: {}", e);
        }
        if let Err(e) = self.hardware.leds.lock().fill(crate::led::Rgb::OFF) {
            warn!("Failed to turn LEDs off: {}", e);
        }

        info!("Shutdown complete");
        outcomes
    }
}
