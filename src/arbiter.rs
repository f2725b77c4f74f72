//! Motor safety arbiter.
//!
//! Fuses the latest ranging reading with a requested wheel command. Only forward
//! motion is limited; reverse and turn-in-place commands pass through untouched.

use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

/// Magnitude limit of the motor driver in either direction.
pub const DRIVER_LIMIT: i32 = 4095;

/// Below this distance forward motion is refused outright.
pub const STOP_DISTANCE_CM: i32 = 10;

/// Below this distance forward motion is scaled by `distance / SLOW_DISTANCE_CM`.
pub const SLOW_DISTANCE_CM: i32 = 40;

const_assert!(STOP_DISTANCE_CM < SLOW_DISTANCE_CM);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MotorCommand {
    pub left: i32,
    pub right: i32,
}

impl MotorCommand {
    pub const STOP: MotorCommand = MotorCommand { left: 0, right: 0 };

    pub fn new(left: i32, right: i32) -> Self {
        Self { left, right }
    }

    /// Both tracks driving forward.
    pub fn is_forward(&self) -> bool {
        self.left > 0 && self.right > 0
    }

    pub fn is_stop(&self) -> bool {
        self.left == 0 && self.right == 0
    }

    /// Clamp both tracks into `[-limit, limit]`.
    pub fn clamped(self, limit: i32) -> Self {
        Self {
            left: self.left.clamp(-limit, limit),
            right: self.right.clamp(-limit, limit),
        }
    }

    /// True when either track differs from `other` by more than `threshold`.
    pub fn differs_from(&self, other: &MotorCommand, threshold: i32) -> bool {
        (self.left - other.left).abs() > threshold || (self.right - other.right).abs() > threshold
    }
}

/// Latest ranging sample as published by the LiDAR worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RangingSample {
    pub distance_cm: i32,
    pub valid: bool,
    pub consecutive_failures: u32,
}

impl RangingSample {
    pub fn valid(distance_cm: i32) -> Self {
        Self {
            distance_cm,
            valid: true,
            consecutive_failures: 0,
        }
    }

    /// Zero-distance sentinel published when the sensor is judged faulty.
    pub fn fail_safe() -> Self {
        Self {
            distance_cm: 0,
            valid: false,
            consecutive_failures: 0,
        }
    }
}

/// What the arbiter knows about the ranging sensor at decision time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangingReading {
    /// No sensor session is active; limiting is disabled.
    Unavailable,
    Sample(RangingSample),
}

/// Map a requested command to the command that may actually reach the tracks.
///
/// `forward` is the caller's notion of forward intent. The network path uses
/// [`MotorCommand::is_forward`]; the gamepad uses the sign of its stick.
pub fn arbitrate(requested: MotorCommand, forward: bool, reading: RangingReading) -> MotorCommand {
    if !forward {
        return requested;
    }

    let sample = match reading {
        RangingReading::Unavailable => return requested,
        RangingReading::Sample(sample) => sample,
    };

    if !sample.valid {
        return MotorCommand::STOP;
    }

    let distance = sample.distance_cm;
    if distance <= 0 || distance < STOP_DISTANCE_CM {
        MotorCommand::STOP
    } else if distance < SLOW_DISTANCE_CM {
        let scale = f64::from(distance) / f64::from(SLOW_DISTANCE_CM);
        MotorCommand {
            left: scale_speed(requested.left, scale),
            right: scale_speed(requested.right, scale),
        }
    } else {
        requested
    }
}

fn scale_speed(speed: i32, scale: f64) -> i32 {
    (f64::from(speed) * scale).round() as i32
}
