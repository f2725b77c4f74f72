//! Gamepad ingestion and control.
//!
//! The reader thread turns raw device events into [`GamepadSnapshot`]s and
//! publishes them whole into shared state. The control loop consumes the latest
//! snapshot at a fixed rate and drives the same router as the network channel.

pub mod calibration;
pub mod codes;
pub mod control;
pub mod device;
pub mod edge;
pub mod reader;

use serde::{Deserialize, Serialize};

pub use calibration::{AxisRange, Calibration};
pub use control::{GamepadControlContext, GamepadController, StepOutcome};
pub use device::{GamepadBackend, GamepadDevice, NoGamepadBackend, RawEvent};
pub use edge::{Edge, EdgeDetector, ValueEdge};
pub use reader::{GamepadReader, InputMapper};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GamepadError {
    #[error("device enumeration failed: {0}")]
    Enumerate(String),
    #[error("failed to read axis calibration from {device}: {reason}")]
    Calibration { device: String, reason: String },
    #[error("gamepad disconnected: {0}")]
    Disconnected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Buttons {
    pub a: bool,
    pub b: bool,
    pub x: bool,
    pub y: bool,
    pub lb: bool,
    pub rb: bool,
    pub start: bool,
    pub select: bool,
    pub home: bool,
}

impl Buttons {
    pub const RELEASED: Buttons = Buttons {
        a: false,
        b: false,
        x: false,
        y: false,
        lb: false,
        rb: false,
        start: false,
        select: false,
        home: false,
    };
}

/// Complete, immutable view of the controller at one instant.
///
/// Sticks are in `[-1, 1]` (up is negative on the Y axes), triggers in
/// `[0, 1]`, and each d-pad axis is -1, 0 or 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GamepadSnapshot {
    pub left_x: f32,
    pub left_y: f32,
    pub right_x: f32,
    pub right_y: f32,
    pub left_trigger: f32,
    pub right_trigger: f32,
    pub dpad_x: i8,
    pub dpad_y: i8,
    pub buttons: Buttons,
    pub connected: bool,
}

impl GamepadSnapshot {
    pub const DISCONNECTED: GamepadSnapshot = GamepadSnapshot {
        left_x: 0.0,
        left_y: 0.0,
        right_x: 0.0,
        right_y: 0.0,
        left_trigger: 0.0,
        right_trigger: 0.0,
        dpad_x: 0,
        dpad_y: 0,
        buttons: Buttons::RELEASED,
        connected: false,
    };

    /// All inputs at rest with the controller attached.
    pub const NEUTRAL: GamepadSnapshot = GamepadSnapshot {
        connected: true,
        ..GamepadSnapshot::DISCONNECTED
    };
}

impl Default for GamepadSnapshot {
    fn default() -> Self {
        Self::DISCONNECTED
    }
}
