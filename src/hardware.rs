//! Actuator and camera collaborators.
//!
//! The daemon talks to hardware only through the traits in this module. Real
//! backends live outside this crate; the simulated backends below trace every
//! call and keep a bounded history so the daemon can run on a workstation and
//! tests can assert on output.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::trace;

use crate::arbiter::MotorCommand;
use crate::led::Rgb;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HardwareError {
    #[error("actuator driver unavailable")]
    Unavailable,
    #[error("invalid servo channel {0}")]
    InvalidChannel(u8),
    #[error("pixel index {index} out of range for {len} LEDs")]
    PixelOutOfRange { index: usize, len: usize },
    #[error("camera not started")]
    CameraStopped,
    #[error("device I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for HardwareError {
    fn from(err: std::io::Error) -> Self {
        HardwareError::Io(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClampDirection {
    Up,
    Down,
}

/// Gripper-limit signal reported after each clamp step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClampState {
    Moving,
    Stopped,
}

/// Motor, servo, ultrasonic and infrared primitives of the car board.
pub trait CarDriver: Send {
    /// Whether the driver board answered at startup.
    fn is_available(&self) -> bool;

    fn set_motors(&mut self, command: MotorCommand) -> Result<(), HardwareError>;

    fn set_servo(&mut self, channel: u8, angle: i32) -> Result<(), HardwareError>;

    /// Onboard ultrasonic distance in centimetres, if the sampler is fitted.
    fn sample_distance(&mut self) -> Option<f32>;

    fn set_line_follow(&mut self, enabled: bool) -> Result<(), HardwareError>;

    fn line_follow_enabled(&self) -> bool;

    /// One iteration of the onboard obstacle-avoidance routine.
    fn ultrasonic_step(&mut self) -> Result<(), HardwareError>;

    /// One iteration of the infrared line-follow routine.
    fn line_follow_step(&mut self) -> Result<(), HardwareError>;

    fn start_clamp(&mut self, direction: ClampDirection) -> Result<(), HardwareError>;

    fn clamp_step(&mut self) -> Result<ClampState, HardwareError>;

    fn stop_clamp(&mut self) -> Result<(), HardwareError>;

    /// Zero the motors and release the board.
    fn shutdown(&mut self) -> Result<(), HardwareError>;
}

pub trait LedStrip: Send {
    fn len(&self) -> usize;

    fn set_pixel(&mut self, index: usize, color: Rgb) -> Result<(), HardwareError>;

    fn show(&mut self) -> Result<(), HardwareError>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn fill(&mut self, color: Rgb) -> Result<(), HardwareError> {
        for index in 0..self.len() {
            self.set_pixel(index, color)?;
        }
        self.show()
    }
}

pub trait FrameSource: Send {
    fn start(&mut self) -> Result<(), HardwareError>;

    /// Capture one encoded frame.
    fn capture(&mut self) -> Result<Vec<u8>, HardwareError>;

    fn stop(&mut self);
}

pub type SharedCar = Arc<Mutex<dyn CarDriver>>;
pub type SharedLedStrip = Arc<Mutex<dyn LedStrip>>;
pub type SharedCamera = Arc<Mutex<dyn FrameSource>>;

/// Every call a [`SimulatedCar`] received, in order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CarEvent {
    Motors(MotorCommand),
    Servo { channel: u8, angle: i32 },
    LineFollow(bool),
    UltrasonicStep,
    LineFollowStep,
    ClampStart(ClampDirection),
    ClampStep,
    ClampStop,
    Shutdown,
}

/// Events kept by a [`CarLog`]; older ones are discarded.
pub const CAR_LOG_CAPACITY: usize = 1024;

/// Shared view of a simulated car's most recent calls.
#[derive(Debug, Clone, Default)]
pub struct CarLog {
    events: Arc<Mutex<VecDeque<CarEvent>>>,
}

impl CarLog {
    fn push(&self, event: CarEvent) {
        trace!("Simulated car: {:?}", event);
        let mut events = self.events.lock();
        if events.len() == CAR_LOG_CAPACITY {
            events.pop_front();
        }
        events.push_back(event);
    }

    pub fn events(&self) -> Vec<CarEvent> {
        self.events.lock().iter().copied().collect()
    }

    pub fn motor_commands(&self) -> Vec<MotorCommand> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                CarEvent::Motors(cmd) => Some(*cmd),
                _ => None,
            })
            .collect()
    }

    pub fn servo_commands(&self) -> Vec<(u8, i32)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                CarEvent::Servo { channel, angle } => Some((*channel, *angle)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

pub const SIM_CLAMP_STEPS: u32 = 3;

/// Logging stand-in for the car board.
#[derive(Debug)]
pub struct SimulatedCar {
    available: bool,
    distance_cm: Option<f32>,
    line_follow: bool,
    clamp_remaining: u32,
    clamp_steps: u32,
    log: CarLog,
}

impl SimulatedCar {
    pub fn new() -> Self {
        Self {
            available: true,
            distance_cm: None,
            line_follow: false,
            clamp_remaining: 0,
            clamp_steps: SIM_CLAMP_STEPS,
            log: CarLog::default(),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    pub fn with_distance(mut self, distance_cm: f32) -> Self {
        self.distance_cm = Some(distance_cm);
        self
    }

    /// Number of clamp steps before the gripper limit reports stopped.
    pub fn with_clamp_steps(mut self, steps: u32) -> Self {
        self.clamp_steps = steps;
        self
    }

    pub fn log(&self) -> CarLog {
        self.log.clone()
    }

    pub fn into_shared(self) -> SharedCar {
        Arc::new(Mutex::new(self))
    }

    fn ensure_available(&self) -> Result<(), HardwareError> {
        if self.available {
            Ok(())
        } else {
            Err(HardwareError::Unavailable)
        }
    }
}

impl Default for SimulatedCar {
    fn default() -> Self {
        Self::new()
    }
}

impl CarDriver for SimulatedCar {
    fn is_available(&self) -> bool {
        self.available
    }

    fn set_motors(&mut self, command: MotorCommand) -> Result<(), HardwareError> {
        self.ensure_available()?;
        self.log.push(CarEvent::Motors(command));
        Ok(())
    }

    fn set_servo(&mut self, channel: u8, angle: i32) -> Result<(), HardwareError> {
        self.ensure_available()?;
        if channel > 1 {
            return Err(HardwareError::InvalidChannel(channel));
        }
        self.log.push(CarEvent::Servo { channel, angle });
        Ok(())
    }

    fn sample_distance(&mut self) -> Option<f32> {
        self.distance_cm
    }

    fn set_line_follow(&mut self, enabled: bool) -> Result<(), HardwareError> {
        self.ensure_available()?;
        self.line_follow = enabled;
        self.log.push(CarEvent::LineFollow(enabled));
        Ok(())
    }

    fn line_follow_enabled(&self) -> bool {
        self.line_follow
    }

    fn ultrasonic_step(&mut self) -> Result<(), HardwareError> {
        self.ensure_available()?;
        self.log.push(CarEvent::UltrasonicStep);
        Ok(())
    }

    fn line_follow_step(&mut self) -> Result<(), HardwareError> {
        self.ensure_available()?;
        self.log.push(CarEvent::LineFollowStep);
        Ok(())
    }

    fn start_clamp(&mut self, direction: ClampDirection) -> Result<(), HardwareError> {
        self.ensure_available()?;
        self.clamp_remaining = self.clamp_steps;
        self.log.push(CarEvent::ClampStart(direction));
        Ok(())
    }

    fn clamp_step(&mut self) -> Result<ClampState, HardwareError> {
        self.ensure_available()?;
        self.log.push(CarEvent::ClampStep);
        self.clamp_remaining = self.clamp_remaining.saturating_sub(1);
        if self.clamp_remaining == 0 {
            Ok(ClampState::Stopped)
        } else {
            Ok(ClampState::Moving)
        }
    }

    fn stop_clamp(&mut self) -> Result<(), HardwareError> {
        self.ensure_available()?;
        self.clamp_remaining = 0;
        self.log.push(CarEvent::ClampStop);
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), HardwareError> {
        self.log.push(CarEvent::Shutdown);
        Ok(())
    }
}

pub const SIM_LED_COUNT: usize = 4;

/// Shared view of a simulated strip: the last shown frame and how many frames were shown.
#[derive(Debug, Clone, Default)]
pub struct StripLog {
    inner: Arc<Mutex<StripLogInner>>,
}

#[derive(Debug, Default)]
struct StripLogInner {
    shown: Vec<Rgb>,
    frames: u64,
}

impl StripLog {
    pub fn shown(&self) -> Vec<Rgb> {
        self.inner.lock().shown.clone()
    }

    pub fn frames(&self) -> u64 {
        self.inner.lock().frames
    }

    pub fn is_dark(&self) -> bool {
        self.inner.lock().shown.iter().all(|c| *c == Rgb::OFF)
    }
}

#[derive(Debug)]
pub struct SimulatedLedStrip {
    pixels: Vec<Rgb>,
    log: StripLog,
}

impl SimulatedLedStrip {
    pub fn new(len: usize) -> Self {
        Self {
            pixels: vec![Rgb::OFF; len],
            log: StripLog::default(),
        }
    }

    pub fn log(&self) -> StripLog {
        self.log.clone()
    }

    pub fn into_shared(self) -> SharedLedStrip {
        Arc::new(Mutex::new(self))
    }
}

impl Default for SimulatedLedStrip {
    fn default() -> Self {
        Self::new(SIM_LED_COUNT)
    }
}

impl LedStrip for SimulatedLedStrip {
    fn len(&self) -> usize {
        self.pixels.len()
    }

    fn set_pixel(&mut self, index: usize, color: Rgb) -> Result<(), HardwareError> {
        let len = self.pixels.len();
        let pixel = self
            .pixels
            .get_mut(index)
            .ok_or(HardwareError::PixelOutOfRange { index, len })?;
        *pixel = color;
        Ok(())
    }

    fn show(&mut self) -> Result<(), HardwareError> {
        trace!("Simulated strip: {:?}", self.pixels);
        let mut log = self.log.inner.lock();
        log.shown = self.pixels.clone();
        log.frames += 1;
        Ok(())
    }
}

/// Produces small binary PPM test frames with a changing shade.
#[derive(Debug, Default)]
pub struct SimulatedCamera {
    running: bool,
    sequence: u8,
}

impl SimulatedCamera {
    const WIDTH: usize = 8;
    const HEIGHT: usize = 8;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_shared(self) -> SharedCamera {
        Arc::new(Mutex::new(self))
    }
}

impl FrameSource for SimulatedCamera {
    fn start(&mut self) -> Result<(), HardwareError> {
        self.running = true;
        Ok(())
    }

    fn capture(&mut self) -> Result<Vec<u8>, HardwareError> {
        if !self.running {
            return Err(HardwareError::CameraStopped);
        }
        self.sequence = self.sequence.wrapping_add(1);

        let mut frame = format!("P6\n{} {}\n255\n", Self::WIDTH, Self::HEIGHT).into_bytes();
        frame.extend(std::iter::repeat(self.sequence).take(Self::WIDTH * Self::HEIGHT * 3));
        Ok(frame)
    }

    fn stop(&mut self) {
        self.running = false;
    }
}
