use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::calibration::Calibration;
use super::codes;
use super::device::{GamepadBackend, GamepadDevice, RawEvent};
use super::GamepadSnapshot;
use crate::state::SharedState;
use crate::supervisor::RunFlag;

/// Folds raw events into a snapshot using the device's calibration.
#[derive(Debug, Clone)]
pub struct InputMapper {
    calibration: Calibration,
    snapshot: GamepadSnapshot,
}

impl InputMapper {
    pub fn new(calibration: Calibration) -> Self {
        Self {
            calibration,
            snapshot: GamepadSnapshot::NEUTRAL,
        }
    }

    pub fn snapshot(&self) -> GamepadSnapshot {
        self.snapshot
    }

    pub fn apply(&mut self, event: RawEvent) {
        let s = &mut self.snapshot;
        match event {
            RawEvent::Axis { code, value } => match code {
                codes::ABS_X => s.left_x = self.calibration.stick(code, value),
                codes::ABS_Y => s.left_y = self.calibration.stick(code, value),
                codes::ABS_RX => s.right_x = self.calibration.stick(code, value),
                codes::ABS_RY => s.right_y = self.calibration.stick(code, value),
                codes::ABS_Z => s.left_trigger = self.calibration.trigger(code, value),
                codes::ABS_RZ => s.right_trigger = self.calibration.trigger(code, value),
                codes::ABS_HAT0X => s.dpad_x = value.signum() as i8,
                codes::ABS_HAT0Y => s.dpad_y = value.signum() as i8,
                _ => {}
            },
            RawEvent::Button { code, pressed } => {
                let b = &mut s.buttons;
                match code {
                    codes::BTN_SOUTH => b.a = pressed,
                    codes::BTN_EAST => b.b = pressed,
                    codes::BTN_NORTH => b.x = pressed,
                    codes::BTN_WEST => b.y = pressed,
                    codes::BTN_TL => b.lb = pressed,
                    codes::BTN_TR => b.rb = pressed,
                    codes::BTN_SELECT => b.select = pressed,
                    codes::BTN_START => b.start = pressed,
                    codes::BTN_MODE => b.home = pressed,
                    _ => {}
                }
            }
        }
    }
}

/// Ingestion worker: discover, calibrate, read, publish; back off and retry on loss.
pub struct GamepadReader {
    backend: Box<dyn GamepadBackend>,
    state: Arc<SharedState>,
    deadzone: f32,
    reconnect_delay: Duration,
}

impl GamepadReader {
    pub fn new(
        backend: Box<dyn GamepadBackend>,
        state: Arc<SharedState>,
        deadzone: f32,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            backend,
            state,
            deadzone,
            reconnect_delay,
        }
    }

    pub fn run(mut self, flag: RunFlag) {
        info!("Gamepad reader running");
        let mut last_error: Option<String> = None;

        while flag.is_running() {
            match self.backend.discover() {
                Ok(Some(device)) => {
                    last_error = None;
                    self.session(device, &flag);
                }
                Ok(None) => debug!("No gamepad found"),
                Err(e) => {
                    let text = e.to_string();
                    if last_error.as_deref() != Some(text.as_str()) {
                        warn!("Gamepad discovery failed: {}", text);
                        last_error = Some(text);
                    }
                }
            }

            self.state.publish_gamepad(GamepadSnapshot::DISCONNECTED);
            if !flag.sleep(self.reconnect_delay) {
                break;
            }
        }

        self.state.publish_gamepad(GamepadSnapshot::DISCONNECTED);
        info!("Gamepad reader stopped");
    }

    /// Read one device until it fails or the worker is stopped.
    pub fn session(&mut self, mut device: Box<dyn GamepadDevice>, flag: &RunFlag) {
        let calibration = Calibration::from_ranges(device.axis_ranges(), self.deadzone);
        let mut mapper = InputMapper::new(calibration);
        self.state.publish_gamepad(mapper.snapshot());
        info!("Gamepad connected: {}", device.name());

        while flag.is_running() {
            match device.read_events() {
                Ok(events) => {
                    for event in events {
                        mapper.apply(event);
                    }
                    self.state.publish_gamepad(mapper.snapshot());
                }
                Err(e) => {
                    info!("Gamepad {} lost: {}", device.name(), e);
                    break;
                }
            }
        }
    }
}
