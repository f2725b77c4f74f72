//! Shared state between workers.
//!
//! Every accessor copies the value out and releases the lock before returning;
//! callers never hold a guard across their own computation.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::arbiter::{MotorCommand, RangingReading, RangingSample};
use crate::gamepad::GamepadSnapshot;
use crate::mode::{CarMode, ModeState};

#[derive(Debug, Default, Clone, Copy)]
struct RangingCell {
    available: bool,
    sample: RangingSample,
}

#[derive(Debug)]
pub struct SharedState {
    ranging: Mutex<RangingCell>,
    gamepad: ArcSwap<GamepadSnapshot>,
    mode: Mutex<ModeState>,
    wheels: Mutex<MotorCommand>,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            ranging: Mutex::new(RangingCell::default()),
            gamepad: ArcSwap::from_pointee(GamepadSnapshot::DISCONNECTED),
            mode: Mutex::new(ModeState::new()),
            wheels: Mutex::new(MotorCommand::STOP),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    // Ranging

    pub fn ranging(&self) -> RangingReading {
        let cell = *self.ranging.lock();
        if cell.available {
            RangingReading::Sample(cell.sample)
        } else {
            RangingReading::Unavailable
        }
    }

    /// Mark a sensor session as open. No valid distance exists until the first good frame.
    pub fn set_ranging_available(&self) {
        let mut cell = self.ranging.lock();
        cell.available = true;
        cell.sample = RangingSample::default();
    }

    pub fn publish_ranging(&self, sample: RangingSample) {
        self.ranging.lock().sample = sample;
    }

    /// Record an invalid read without disturbing the published distance.
    pub fn record_ranging_failure(&self, consecutive_failures: u32) {
        self.ranging.lock().sample.consecutive_failures = consecutive_failures;
    }

    /// Forget the last distance and disable limiting.
    pub fn clear_ranging(&self) {
        *self.ranging.lock() = RangingCell::default();
    }

    // Gamepad

    pub fn gamepad(&self) -> GamepadSnapshot {
        **self.gamepad.load()
    }

    pub fn publish_gamepad(&self, snapshot: GamepadSnapshot) {
        self.gamepad.store(Arc::new(snapshot));
    }

    // Mode

    pub fn mode(&self) -> CarMode {
        self.mode.lock().current()
    }

    pub fn mode_state(&self) -> ModeState {
        *self.mode.lock()
    }

    /// Apply `f` to the mode state under the lock and return its result.
    pub fn update_mode<R>(&self, f: impl FnOnce(&mut ModeState) -> R) -> R {
        f(&mut self.mode.lock())
    }

    // Wheel-speed echo

    pub fn wheels(&self) -> MotorCommand {
        *self.wheels.lock()
    }

    pub fn set_wheels(&self, command: MotorCommand) {
        *self.wheels.lock() = command;
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranging_unavailable_until_session_opens() {
        let state = SharedState::new();
        assert_eq!(state.ranging(), RangingReading::Unavailable);

        state.set_ranging_available();
        match state.ranging() {
            RangingReading::Sample(sample) => assert!(!sample.valid),
            RangingReading::Unavailable => panic!("session should be open"),
        }

        state.clear_ranging();
        assert_eq!(state.ranging(), RangingReading::Unavailable);
    }

    #[test]
    fn test_failure_count_keeps_distance() {
        let state = SharedState::new();
        state.set_ranging_available();
        state.publish_ranging(RangingSample::valid(80));
        state.record_ranging_failure(3);
        match state.ranging() {
            RangingReading::Sample(sample) => {
                assert_eq!(sample.distance_cm, 80);
                assert!(sample.valid);
                assert_eq!(sample.consecutive_failures, 3);
            }
            RangingReading::Unavailable => panic!("session should be open"),
        }
    }
}
