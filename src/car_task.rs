//! Per-mode car loop: sonic reports, autonomous steps and gripper actions.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::hardware::{ClampDirection, ClampState};
use crate::mode::{ActionReply, CarMode};
use crate::protocol::Reply;
use crate::router::CommandRouter;
use crate::supervisor::RunFlag;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CarTaskTiming {
    /// Sonic report period in free mode.
    pub sonic_interval: Duration,
    /// Pause between autonomous steps.
    pub auto_pause: Duration,
    /// Pause between gripper steps.
    pub clamp_step: Duration,
}

impl CarTaskTiming {
    pub fn instant() -> Self {
        Self {
            sonic_interval: Duration::ZERO,
            auto_pause: Duration::ZERO,
            clamp_step: Duration::ZERO,
        }
    }
}

impl Default for CarTaskTiming {
    fn default() -> Self {
        Self {
            sonic_interval: Duration::from_secs(1),
            auto_pause: Duration::from_millis(20),
            clamp_step: Duration::from_millis(20),
        }
    }
}

pub struct CarTask {
    router: CommandRouter,
    timing: CarTaskTiming,
}

impl CarTask {
    pub fn new(router: CommandRouter, timing: CarTaskTiming) -> Self {
        Self { router, timing }
    }

    pub fn run(mut self, flag: RunFlag) {
        info!("Car task running");
        while flag.is_running() && self.step(&flag) {}
        info!("Car task stopped");
    }

    /// One pass for the current mode. Returns whether the worker should continue.
    pub fn step(&mut self, flag: &RunFlag) -> bool {
        if !self.router.car().lock().is_available() {
            return flag.sleep(self.timing.sonic_interval);
        }

        let mode = self.router.state().mode();
        match mode {
            CarMode::Free => {
                self.report_distance();
                flag.sleep(self.timing.sonic_interval)
            }
            CarMode::UltrasonicAuto => {
                let result = self.router.car().lock().ultrasonic_step();
                if let Err(e) = result {
                    warn!("Ultrasonic step failed: {}", e);
                }
                self.report_distance();
                flag.sleep(self.timing.auto_pause)
            }
            CarMode::InfraredLine => {
                let result = self.router.car().lock().line_follow_step();
                if let Err(e) = result {
                    warn!("Line-follow step failed: {}", e);
                }
                flag.sleep(self.timing.auto_pause)
            }
            CarMode::ClampStop => {
                let result = self.router.car().lock().stop_clamp();
                if let Err(e) = result {
                    warn!("Clamp stop failed: {}", e);
                }
                self.finish_action(mode);
                flag.is_running()
            }
            CarMode::ClampUp => self.run_clamp(mode, ClampDirection::Up, flag),
            CarMode::ClampDown => self.run_clamp(mode, ClampDirection::Down, flag),
        }
    }

    fn run_clamp(&mut self, mode: CarMode, direction: ClampDirection, flag: &RunFlag) -> bool {
        let started = self.router.car().lock().start_clamp(direction);
        if let Err(e) = started {
            warn!("Clamp {:?} failed to start: {}", direction, e);
            self.abandon_action(mode);
            return flag.is_running();
        }

        while flag.is_running() && self.router.state().mode() == mode {
            let step = self.router.car().lock().clamp_step();
            match step {
                Ok(ClampState::Stopped) => {
                    self.finish_action(mode);
                    return flag.is_running();
                }
                Ok(ClampState::Moving) => {
                    flag.sleep(self.timing.clamp_step);
                }
                Err(e) => {
                    warn!("Clamp step failed: {}", e);
                    self.abandon_action(mode);
                    return flag.is_running();
                }
            }
        }

        debug!("Clamp {:?} interrupted", direction);
        let result = self.router.car().lock().stop_clamp();
        if let Err(e) = result {
            warn!("Clamp stop failed: {}", e);
        }
        flag.is_running()
    }

    /// Revert to the mode before the action and tell clients it completed.
    fn finish_action(&self, mode: CarMode) {
        if self.revert_from(mode) {
            if let Some(reply) = ActionReply::for_mode(mode) {
                info!("Action {} complete", mode);
                self.router.reply(Reply::Action(reply));
            }
        }
    }

    fn abandon_action(&self, mode: CarMode) {
        let result = self.router.car().lock().stop_clamp();
        if let Err(e) = result {
            warn!("Clamp stop failed: {}", e);
        }
        self.revert_from(mode);
    }

    fn revert_from(&self, mode: CarMode) -> bool {
        self.router.state().update_mode(|m| {
            if m.current() == mode {
                m.finish_action();
                true
            } else {
                false
            }
        })
    }

    fn report_distance(&self) {
        let distance = self.router.car().lock().sample_distance();
        if let Some(distance_cm) = distance {
            self.router.reply(Reply::Sonic { distance_cm });
        }
    }
}
