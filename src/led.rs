//! LED command queue consumer and pattern rendering.
//!
//! Commands are queued by the router and the gamepad loop. The consumer applies
//! the newest command and keeps re-rendering it while the queue is empty. A
//! multi-step pattern always runs to completion before the queue is checked
//! again, so a command queued mid-pattern waits for the current pass.

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::hardware::{HardwareError, SharedLedStrip};
use crate::supervisor::RunFlag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const OFF: Rgb = Rgb::new(0, 0, 0);
    pub const RED: Rgb = Rgb::new(255, 0, 0);
    pub const GREEN: Rgb = Rgb::new(0, 255, 0);
    pub const BLUE: Rgb = Rgb::new(0, 0, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Scale every channel by `level / 255`.
    pub fn dimmed(self, level: u8) -> Self {
        let scale = |c: u8| ((u16::from(c) * u16::from(level)) / 255) as u8;
        Self::new(scale(self.r), scale(self.g), scale(self.b))
    }

    /// Position on a 0..=255 colour wheel (red → green → blue → red).
    pub fn wheel(position: u8) -> Self {
        match position {
            0..=84 => Self::new(255 - position * 3, position * 3, 0),
            85..=169 => {
                let p = position - 85;
                Self::new(0, 255 - p * 3, p * 3)
            }
            _ => {
                let p = position - 170;
                Self::new(p * 3, 0, 255 - p * 3)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedPattern {
    /// Masked pixels lit in the command colour.
    Solid,
    /// Red, green, blue and dark wipes, one pixel at a time.
    Wipe,
    Blink,
    Breathe,
    Rainbow,
}

impl LedPattern {
    pub fn from_mode(mode: i32) -> Option<Self> {
        match mode {
            1 => Some(LedPattern::Solid),
            2 => Some(LedPattern::Wipe),
            3 => Some(LedPattern::Blink),
            4 => Some(LedPattern::Breathe),
            5 => Some(LedPattern::Rainbow),
            _ => None,
        }
    }
}

/// Decoded `CMD_LED#mode#r#g#b#mask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedCommand {
    pub mode: i32,
    pub color: Rgb,
    /// Bit `n` selects pixel `n` for [`LedPattern::Solid`].
    pub mask: u8,
}

impl LedCommand {
    pub fn new(mode: i32, color: Rgb, mask: u8) -> Self {
        Self { mode, color, mask }
    }

    pub fn off() -> Self {
        Self::new(0, Rgb::OFF, 0)
    }

    /// `None` for mode 0 and unrecognized ids, both of which mean "off".
    pub fn pattern(&self) -> Option<LedPattern> {
        LedPattern::from_mode(self.mode)
    }
}

impl Default for LedCommand {
    fn default() -> Self {
        Self::off()
    }
}

/// Frame pacing for each pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedTiming {
    pub solid_hold: Duration,
    pub wipe_step: Duration,
    pub blink_half: Duration,
    pub breathe_frame: Duration,
    pub rainbow_frame: Duration,
    /// How long the consumer blocks on an empty queue while dark.
    pub idle_poll: Duration,
}

impl LedTiming {
    /// No pacing at all; every pattern renders as fast as the strip accepts.
    pub fn instant() -> Self {
        Self {
            solid_hold: Duration::ZERO,
            wipe_step: Duration::ZERO,
            blink_half: Duration::ZERO,
            breathe_frame: Duration::ZERO,
            rainbow_frame: Duration::ZERO,
            idle_poll: Duration::from_millis(5),
        }
    }
}

impl Default for LedTiming {
    fn default() -> Self {
        Self {
            solid_hold: Duration::from_millis(100),
            wipe_step: Duration::from_millis(120),
            blink_half: Duration::from_millis(50),
            breathe_frame: Duration::from_millis(10),
            rainbow_frame: Duration::from_millis(20),
            idle_poll: Duration::from_millis(100),
        }
    }
}

const BREATHE_STEP: usize = 5;
const RAINBOW_FRAMES: usize = 64;

pub struct LedRenderer {
    strip: SharedLedStrip,
    timing: LedTiming,
}

impl LedRenderer {
    pub fn new(strip: SharedLedStrip, timing: LedTiming) -> Self {
        Self { strip, timing }
    }

    pub fn timing(&self) -> &LedTiming {
        &self.timing
    }

    pub fn off(&self) -> Result<(), HardwareError> {
        self.strip.lock().fill(Rgb::OFF)
    }

    /// Render one full pass of `command`'s pattern.
    ///
    /// Returns `Ok(false)` if the run flag was cleared at a frame boundary.
    pub fn render(&self, command: &LedCommand, flag: &RunFlag) -> Result<bool, HardwareError> {
        match command.pattern() {
            Some(LedPattern::Solid) => self.solid(command, flag),
            Some(LedPattern::Wipe) => {
                for color in [Rgb::RED, Rgb::GREEN, Rgb::BLUE, Rgb::OFF] {
                    if !self.wipe(color, flag)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Some(LedPattern::Blink) => {
                self.strip.lock().fill(command.color)?;
                if !flag.sleep(self.timing.blink_half) {
                    return Ok(false);
                }
                self.strip.lock().fill(Rgb::OFF)?;
                Ok(flag.sleep(self.timing.blink_half))
            }
            Some(LedPattern::Breathe) => self.breathe(command.color, flag),
            Some(LedPattern::Rainbow) => self.rainbow(flag),
            None => {
                self.off()?;
                Ok(flag.is_running())
            }
        }
    }

    fn solid(&self, command: &LedCommand, flag: &RunFlag) -> Result<bool, HardwareError> {
        {
            let mut strip = self.strip.lock();
            for index in 0..strip.len() {
                let lit = index < 8 && command.mask & (1 << index) != 0;
                strip.set_pixel(index, if lit { command.color } else { Rgb::OFF })?;
            }
            strip.show()?;
        }
        Ok(flag.sleep(self.timing.solid_hold))
    }

    fn wipe(&self, color: Rgb, flag: &RunFlag) -> Result<bool, HardwareError> {
        let len = self.strip.lock().len();
        for index in 0..len {
            {
                let mut strip = self.strip.lock();
                strip.set_pixel(index, color)?;
                strip.show()?;
            }
            if !flag.sleep(self.timing.wipe_step) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn breathe(&self, color: Rgb, flag: &RunFlag) -> Result<bool, HardwareError> {
        let up = (0..=255u8).step_by(BREATHE_STEP);
        let down = (0..=255u8).rev().step_by(BREATHE_STEP);
        for level in up.chain(down) {
            self.strip.lock().fill(color.dimmed(level))?;
            if !flag.sleep(self.timing.breathe_frame) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn rainbow(&self, flag: &RunFlag) -> Result<bool, HardwareError> {
        for frame in 0..RAINBOW_FRAMES {
            {
                let mut strip = self.strip.lock();
                let len = strip.len().max(1);
                for index in 0..strip.len() {
                    let position = (index * 256 / len + frame * 4) % 256;
                    strip.set_pixel(index, Rgb::wheel(position as u8))?;
                }
                strip.show()?;
            }
            if !flag.sleep(self.timing.rainbow_frame) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Single consumer of the LED command queue.
pub struct LedConsumer {
    queue: Receiver<LedCommand>,
    renderer: LedRenderer,
    current: LedCommand,
    dark: bool,
}

impl LedConsumer {
    pub fn new(queue: Receiver<LedCommand>, renderer: LedRenderer) -> Self {
        Self {
            queue,
            renderer,
            current: LedCommand::off(),
            dark: false,
        }
    }

    pub fn current(&self) -> LedCommand {
        self.current
    }

    /// Drain the queue, then render one pass of the newest command.
    ///
    /// Returns `false` once the worker should exit.
    pub fn poll_once(&mut self, flag: &RunFlag) -> bool {
        loop {
            match self.queue.try_recv() {
                Ok(command) => self.apply(command),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return false,
            }
        }

        if self.current.pattern().is_none() {
            return self.idle(flag);
        }

        match self.renderer.render(&self.current, flag) {
            Ok(running) => running,
            Err(e) => {
                warn!("LED render failed: {}", e);
                flag.sleep(self.renderer.timing().idle_poll)
            }
        }
    }

    /// Run until the flag is cleared or every sender is gone, then turn the strip off.
    pub fn run(mut self, flag: RunFlag) {
        info!("LED consumer running");
        while flag.is_running() && self.poll_once(&flag) {}

        if let Err(e) = self.renderer.off() {
            warn!("Failed to turn LEDs off: {}", e);
        }
        info!("LED consumer stopped");
    }

    fn apply(&mut self, command: LedCommand) {
        debug!("LED command {:?}", command);
        self.current = command;
        self.dark = false;
    }

    fn idle(&mut self, flag: &RunFlag) -> bool {
        if !self.dark {
            if let Err(e) = self.renderer.off() {
                warn!("Failed to turn LEDs off: {}", e);
            }
            self.dark = true;
        }

        match self.queue.recv_timeout(self.renderer.timing().idle_poll) {
            Ok(command) => {
                self.apply(command);
                flag.is_running()
            }
            Err(RecvTimeoutError::Timeout) => flag.is_running(),
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wheel_endpoints() {
        assert_eq!(Rgb::wheel(0), Rgb::RED);
        assert_eq!(Rgb::wheel(85), Rgb::GREEN);
        assert_eq!(Rgb::wheel(170), Rgb::BLUE);
    }

    #[test]
    fn test_unknown_mode_has_no_pattern() {
        assert_eq!(LedCommand::new(9, Rgb::RED, 15).pattern(), None);
        assert_eq!(LedCommand::off().pattern(), None);
    }
}
