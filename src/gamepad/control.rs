//! Fixed-rate gamepad control loop.
//!
//! Each iteration applies the latest snapshot in a fixed order: connection
//! transitions, speed level, drive, servos, triggers, then buttons. Every
//! digital input acts on its rising edge only.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

use super::edge::{EdgeDetector, ValueEdge};
use super::GamepadSnapshot;
use crate::arbiter::MotorCommand;
use crate::config::GamepadConfig;
use crate::led::{LedCommand, Rgb};
use crate::mode::{ActionRequest, CarMode};
use crate::router::{CommandRouter, Hysteresis};
use crate::supervisor::RunFlag;

pub const SPEED_MULTIPLIERS: [f32; 5] = [0.25, 0.50, 0.75, 1.00, 1.25];
pub const DEFAULT_SPEED_LEVEL: usize = 2;
pub const MAX_SPEED_LEVEL: usize = SPEED_MULTIPLIERS.len() - 1;

pub const DRIVE_HYSTERESIS: i32 = 50;

pub const PAN_SERVO: u8 = 0;
pub const TILT_SERVO: u8 = 1;
pub const SERVO_MIN: f32 = 90.0;
pub const SERVO_MAX: f32 = 150.0;
pub const PAN_HOME: f32 = 90.0;
pub const TILT_HOME: f32 = 140.0;
pub const ARM_UP: f32 = 90.0;
pub const ARM_DOWN: f32 = 150.0;

pub const STICK_ACTIVE: f32 = 0.1;
pub const TRIGGER_PRESSED: f32 = 0.5;

pub const LED_PATTERN_COUNT: i32 = 5;
pub const LED_CYCLE_COLOR: Rgb = Rgb::new(100, 100, 100);
pub const LED_CYCLE_MASK: u8 = 0x0f;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    /// No controller; poll again at the idle cadence.
    Disconnected,
    Active,
}

/// Session state carried between iterations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GamepadControlContext {
    pub pan: f32,
    pub tilt: f32,
    pub led_pattern: i32,
    pub speed_level: usize,
    pub pinch: bool,
    pub drop: bool,
    pub connected: bool,
    dpad_y: ValueEdge<i8>,
    right_trigger: EdgeDetector,
    left_trigger: EdgeDetector,
    a: EdgeDetector,
    b: EdgeDetector,
    x: EdgeDetector,
    y: EdgeDetector,
    rb: EdgeDetector,
    lb: EdgeDetector,
    home: EdgeDetector,
}

impl GamepadControlContext {
    pub fn new() -> Self {
        Self {
            pan: PAN_HOME,
            tilt: TILT_HOME,
            led_pattern: 0,
            speed_level: DEFAULT_SPEED_LEVEL,
            pinch: false,
            drop: false,
            connected: false,
            dpad_y: ValueEdge::new(),
            right_trigger: EdgeDetector::new(),
            left_trigger: EdgeDetector::new(),
            a: EdgeDetector::new(),
            b: EdgeDetector::new(),
            x: EdgeDetector::new(),
            y: EdgeDetector::new(),
            rb: EdgeDetector::new(),
            lb: EdgeDetector::new(),
            home: EdgeDetector::new(),
        }
    }

    pub fn clear_edges(&mut self) {
        self.dpad_y.reset();
        for edge in [
            &mut self.right_trigger,
            &mut self.left_trigger,
            &mut self.a,
            &mut self.b,
            &mut self.x,
            &mut self.y,
            &mut self.rb,
            &mut self.lb,
            &mut self.home,
        ] {
            edge.reset();
        }
    }

    pub fn cancel_toggles(&mut self) {
        self.pinch = false;
        self.drop = false;
    }

    pub fn multiplier(&self) -> f32 {
        SPEED_MULTIPLIERS[self.speed_level.min(MAX_SPEED_LEVEL)]
    }
}

impl Default for GamepadControlContext {
    fn default() -> Self {
        Self::new()
    }
}

pub struct GamepadController {
    router: CommandRouter,
    config: GamepadConfig,
    ctx: GamepadControlContext,
}

impl GamepadController {
    pub fn new(router: CommandRouter, config: GamepadConfig) -> Self {
        Self {
            router,
            config,
            ctx: GamepadControlContext::new(),
        }
    }

    pub fn context(&self) -> &GamepadControlContext {
        &self.ctx
    }

    /// Run one iteration against `snapshot`.
    pub fn step(&mut self, snapshot: &GamepadSnapshot) -> StepOutcome {
        if !snapshot.connected {
            if self.ctx.connected {
                info!("Gamepad disconnected, stopping motors");
                self.stop();
                self.ctx.connected = false;
            }
            return StepOutcome::Disconnected;
        }

        if !self.ctx.connected {
            self.on_connect();
        }

        self.update_speed_level(snapshot);

        if self.router.state().mode() == CarMode::Free {
            self.drive(snapshot);
            self.update_servos(snapshot);
        }

        self.update_triggers(snapshot);
        self.update_buttons(snapshot);
        StepOutcome::Active
    }

    /// Pace [`step`](Self::step) at the loop rate, or the idle rate while disconnected.
    pub fn run(mut self, flag: RunFlag) {
        let active = self.config.loop_period();
        let idle = self.config.idle_period();
        info!("Gamepad control running at {:?}", active);

        while flag.is_running() {
            let started = Instant::now();
            let snapshot = self.router.state().gamepad();
            let period = match self.step(&snapshot) {
                StepOutcome::Active => active,
                StepOutcome::Disconnected => idle,
            };
            if !flag.sleep_remaining(started, period) {
                break;
            }
        }
        info!("Gamepad control stopped");
    }

    fn on_connect(&mut self) {
        info!("Gamepad connected, resetting control state");
        self.ctx.connected = true;
        self.stop();
        self.ctx.clear_edges();
        self.router.force_mode(CarMode::Free);
        self.ctx.cancel_toggles();
    }

    fn stop(&mut self) {
        self.router.stop_motors();
    }

    fn update_speed_level(&mut self, snapshot: &GamepadSnapshot) {
        let Some(dpad) = self.ctx.dpad_y.update(snapshot.dpad_y) else {
            return;
        };
        let level = match dpad {
            -1 => (self.ctx.speed_level + 1).min(MAX_SPEED_LEVEL),
            1 => self.ctx.speed_level.saturating_sub(1),
            _ => return,
        };
        if level != self.ctx.speed_level {
            self.ctx.speed_level = level;
            info!("Gamepad speed level {} ({:.0}%)", level, self.ctx.multiplier() * 100.0);
        }
    }

    fn drive(&mut self, snapshot: &GamepadSnapshot) {
        let max_speed = (self.config.motor_base as f32 * self.ctx.multiplier()) as i32;
        let forward = -snapshot.left_y;
        let turn = -snapshot.left_x;

        let requested = MotorCommand::new(
            ((forward + turn) * max_speed as f32) as i32,
            ((forward - turn) * max_speed as f32) as i32,
        );
        // Compare against the wheel echo so network writes count too
        let hysteresis = Hysteresis {
            last: self.router.state().wheels(),
            threshold: DRIVE_HYSTERESIS,
        };

        self.router.drive(requested, forward > 0.0, Some(hysteresis));
    }

    fn update_servos(&mut self, snapshot: &GamepadSnapshot) {
        let step = self.config.servo_step_deg;

        if snapshot.right_x.abs() > STICK_ACTIVE {
            self.ctx.pan = (self.ctx.pan + snapshot.right_x * step).clamp(SERVO_MIN, SERVO_MAX);
            self.router.set_servo(PAN_SERVO, self.ctx.pan as i32);
        }
        if snapshot.right_y.abs() > STICK_ACTIVE {
            self.ctx.tilt = (self.ctx.tilt - snapshot.right_y * step).clamp(SERVO_MIN, SERVO_MAX);
            self.router.set_servo(TILT_SERVO, self.ctx.tilt as i32);
        }
    }

    fn update_triggers(&mut self, snapshot: &GamepadSnapshot) {
        if self.ctx.right_trigger.rising(snapshot.right_trigger > TRIGGER_PRESSED) {
            if self.ctx.pinch {
                self.ctx.pinch = false;
                info!("Gamepad pinch off");
                self.router.request_action(ActionRequest::Stop);
            } else {
                self.ctx.pinch = true;
                self.ctx.drop = false;
                info!("Gamepad pinch on");
                self.router.request_action(ActionRequest::Up);
            }
        }

        if self.ctx.left_trigger.rising(snapshot.left_trigger > TRIGGER_PRESSED) {
            if self.ctx.drop {
                self.ctx.drop = false;
                info!("Gamepad drop off");
                self.router.request_action(ActionRequest::Stop);
            } else {
                self.ctx.drop = true;
                self.ctx.pinch = false;
                info!("Gamepad drop on");
                self.router.request_action(ActionRequest::Down);
            }
        }
    }

    fn update_buttons(&mut self, snapshot: &GamepadSnapshot) {
        let buttons = snapshot.buttons;

        if self.ctx.a.rising(buttons.a) {
            info!("Gamepad emergency stop");
            self.stop();
            self.ctx.cancel_toggles();
            self.router.force_mode(CarMode::Free);
        }

        if self.ctx.b.rising(buttons.b) {
            debug!("Gamepad LEDs off");
            self.leds_off();
        }

        if self.ctx.x.rising(buttons.x) {
            debug!("Gamepad servo home");
            self.home_servos();
        }

        if self.ctx.y.rising(buttons.y) {
            self.ctx.led_pattern = if (1..LED_PATTERN_COUNT).contains(&self.ctx.led_pattern) {
                self.ctx.led_pattern + 1
            } else {
                1
            };
            debug!("Gamepad LED pattern {}", self.ctx.led_pattern);
            self.router.queue_led(LedCommand::new(
                self.ctx.led_pattern,
                LED_CYCLE_COLOR,
                LED_CYCLE_MASK,
            ));
        }

        if self.ctx.rb.rising(buttons.rb) {
            self.ctx.tilt = ARM_UP;
            self.router.set_servo(TILT_SERVO, ARM_UP as i32);
        }

        if self.ctx.lb.rising(buttons.lb) {
            self.ctx.tilt = ARM_DOWN;
            self.router.set_servo(TILT_SERVO, ARM_DOWN as i32);
        }

        if self.ctx.home.rising(buttons.home) {
            info!("Gamepad full reset");
            self.stop();
            self.home_servos();
            self.ctx.speed_level = DEFAULT_SPEED_LEVEL;
            self.ctx.cancel_toggles();
            self.router.force_mode(CarMode::Free);
            self.leds_off();
        }
    }

    fn home_servos(&mut self) {
        self.ctx.pan = PAN_HOME;
        self.ctx.tilt = TILT_HOME;
        self.router.set_servo(PAN_SERVO, PAN_HOME as i32);
        self.router.set_servo(TILT_SERVO, TILT_HOME as i32);
    }

    fn leds_off(&mut self) {
        self.ctx.led_pattern = 0;
        self.router.queue_led(LedCommand::off());
    }
}
