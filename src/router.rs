//! Command routing: the single boundary between command sources and the car.
//!
//! Both the network receiver and the gamepad loop go through [`CommandRouter`].
//! The actuator capability check happens here once, before the arbiter or the
//! driver is touched.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::arbiter::{arbitrate, MotorCommand, DRIVER_LIMIT};
use crate::hardware::SharedCar;
use crate::led::LedCommand;
use crate::mode::{ActionRequest, CarMode, ModeRequest};
use crate::protocol::{self, Command, CommandLine, Reply};
use crate::state::SharedState;
use crate::supervisor::RunFlag;

pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Suppress a drive command that is too close to the last one sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hysteresis {
    pub last: MotorCommand,
    pub threshold: i32,
}

#[derive(Clone)]
pub struct CommandRouter {
    state: Arc<SharedState>,
    car: SharedCar,
    leds: Sender<LedCommand>,
    replies: broadcast::Sender<String>,
    settle_delay: Duration,
}

impl CommandRouter {
    pub fn new(
        state: Arc<SharedState>,
        car: SharedCar,
        leds: Sender<LedCommand>,
        replies: broadcast::Sender<String>,
    ) -> Self {
        Self {
            state,
            car,
            leds,
            replies,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    /// Pause after suspending line-follow before the new mode takes effect.
    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    pub fn car(&self) -> &SharedCar {
        &self.car
    }

    /// Parse and execute one line. Malformed lines are logged and dropped.
    pub fn handle_line(&self, line: &str) -> Option<Command> {
        match protocol::parse_line(line) {
            Ok(command) => {
                self.execute(command);
                Some(command)
            }
            Err(e) => {
                debug!("Dropping line {:?}: {}", line, e);
                None
            }
        }
    }

    pub fn execute(&self, command: Command) {
        trace!("Executing {:?}", command);
        match command {
            Command::Motor(requested) => {
                self.drive(requested, requested.is_forward(), None);
            }
            Command::Servo { channel, angle } => {
                let mode = self.state.mode();
                if mode.allows_servo() {
                    self.set_servo(channel, angle);
                } else {
                    info!("Servo command ignored in {} mode", mode);
                }
            }
            Command::Led(led) => self.queue_led(led),
            Command::Mode(request) => {
                self.request_mode(request);
            }
            Command::Action(action) => {
                self.request_action(action);
            }
            Command::SonicRequest => {
                let distance = self.car.lock().sample_distance();
                match distance {
                    Some(distance_cm) => self.reply(Reply::Sonic { distance_cm }),
                    None => debug!("Sonic request with no ultrasonic sampler"),
                }
            }
        }
    }

    /// Send a motor command through the arbiter to the driver.
    ///
    /// Returns the command actually written, or `None` when the driver is
    /// unavailable, the write failed, or hysteresis suppressed it.
    pub fn drive(
        &self,
        requested: MotorCommand,
        forward: bool,
        hysteresis: Option<Hysteresis>,
    ) -> Option<MotorCommand> {
        if !self.car.lock().is_available() {
            trace!("Drive dropped, actuator unavailable");
            return None;
        }

        let command = arbitrate(requested.clamped(DRIVER_LIMIT), forward, self.state.ranging());

        if let Some(h) = hysteresis {
            if !command.is_stop() && !command.differs_from(&h.last, h.threshold) {
                trace!("Drive {:?} within hysteresis of {:?}", command, h.last);
                return None;
            }
        }

        self.write_motors(command)
    }

    /// Zero the motors, bypassing the arbiter.
    pub fn stop_motors(&self) -> Option<MotorCommand> {
        if !self.car.lock().is_available() {
            return None;
        }
        self.write_motors(MotorCommand::STOP)
    }

    pub fn set_servo(&self, channel: u8, angle: i32) -> bool {
        let mut car = self.car.lock();
        if !car.is_available() {
            return false;
        }
        match car.set_servo(channel, angle) {
            Ok(()) => true,
            Err(e) => {
                warn!("Servo {} write failed: {}", channel, e);
                false
            }
        }
    }

    /// Enter `request`'s mode. Free issues exactly one stop; line-follow is re-armed last.
    pub fn request_mode(&self, request: ModeRequest) -> CarMode {
        self.suspend_line_follow();
        let mode = self.state.update_mode(|m| m.request(request));
        info!("Mode -> {}", mode);

        match request {
            ModeRequest::Free => {
                self.stop_motors();
            }
            ModeRequest::LineFollow => {
                let mut car = self.car.lock();
                if car.is_available() {
                    if let Err(e) = car.set_line_follow(true) {
                        warn!("Failed to enable line-follow: {}", e);
                    }
                }
            }
            ModeRequest::Ultrasonic => {}
        }
        mode
    }

    /// Enter a gripper action; the car task carries it out.
    pub fn request_action(&self, action: ActionRequest) -> CarMode {
        self.suspend_line_follow();
        let mode = self.state.update_mode(|m| m.begin_action(action));
        info!("Action -> {}", mode);
        mode
    }

    /// Overwrite the current mode without the settle interlock (gamepad resets).
    pub fn force_mode(&self, mode: CarMode) {
        self.state.update_mode(|m| m.force(mode));
    }

    pub fn queue_led(&self, command: LedCommand) {
        if self.leds.send(command).is_err() {
            debug!("LED queue closed, dropping {:?}", command);
        }
    }

    /// Broadcast a reply line to every connected command client.
    pub fn reply(&self, reply: Reply) {
        match protocol::encode_reply(&reply) {
            Ok(line) => {
                // No receivers just means no client is connected.
                let _ = self.replies.send(line.to_string());
            }
            Err(e) => warn!("Failed to encode {:?}: {}", reply, e),
        }
    }

    fn write_motors(&self, command: MotorCommand) -> Option<MotorCommand> {
        let result = self.car.lock().set_motors(command);
        match result {
            Ok(()) => {
                self.state.set_wheels(command);
                Some(command)
            }
            Err(e) => {
                warn!("Motor write failed: {}", e);
                None
            }
        }
    }

    fn suspend_line_follow(&self) {
        let suspended = {
            let mut car = self.car.lock();
            if car.is_available() && car.line_follow_enabled() {
                if let Err(e) = car.set_line_follow(false) {
                    warn!("Failed to suspend line-follow: {}", e);
                }
                true
            } else {
                false
            }
        };

        if suspended && !self.settle_delay.is_zero() {
            std::thread::sleep(self.settle_delay);
        }
    }
}

pub const RECEIVE_POLL: Duration = Duration::from_millis(50);

/// Worker draining transport frames into the router, FIFO per client.
pub struct CommandReceiver {
    inbound: Receiver<CommandLine>,
    router: CommandRouter,
}

impl CommandReceiver {
    pub fn new(inbound: Receiver<CommandLine>, router: CommandRouter) -> Self {
        Self { inbound, router }
    }

    /// Handle every line in one received chunk. Returns how many parsed.
    pub fn dispatch(&self, frame: &CommandLine) -> usize {
        protocol::split_frame(&frame.text)
            .filter_map(|line| self.router.handle_line(line))
            .count()
    }

    pub fn run(self, flag: RunFlag) {
        info!("Command receiver running");
        while flag.is_running() {
            match self.inbound.recv_timeout(RECEIVE_POLL) {
                Ok(frame) => {
                    trace!("Frame from {}: {:?}", frame.peer, frame.text);
                    self.dispatch(&frame);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("Command receiver stopped");
    }
}
