//! TF-Mini-S LiDAR ingestion.
//!
//! Frame layout (9 bytes): `0x59 0x59 dist_lo dist_hi strength_lo strength_hi
//! temp_lo temp_hi checksum`, where the checksum is the low byte of the sum of
//! the first eight bytes.

use serde::{Deserialize, Serialize};
use std::io::Read;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, trace, warn};

use crate::arbiter::RangingSample;
use crate::config::LidarConfig;
use crate::state::SharedState;
use crate::supervisor::RunFlag;

pub const FRAME_LEN: usize = 9;
pub const FRAME_HEADER: [u8; 2] = [0x59, 0x59];
pub const MIN_DISTANCE_CM: u16 = 10;
pub const MAX_DISTANCE_CM: u16 = 1200;
pub const DEFAULT_FAIL_SAFE_THRESHOLD: u32 = 10;

pub type Frame = [u8; FRAME_LEN];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LidarError {
    #[error("failed to open {port}: {reason}")]
    Open { port: String, reason: String },
    #[error("bad frame header {0:#04x} {1:#04x}")]
    BadHeader(u8, u8),
    #[error("checksum mismatch: computed {computed:#04x}, frame says {received:#04x}")]
    Checksum { computed: u8, received: u8 },
    #[error("distance {0} cm outside accepted range")]
    OutOfRange(u16),
    #[error("serial read error: {0}")]
    Io(String),
}

impl From<std::io::Error> for LidarError {
    fn from(err: std::io::Error) -> Self {
        LidarError::Io(err.to_string())
    }
}

/// Validate a frame and extract the distance in centimetres.
pub fn decode_frame(frame: &Frame) -> Result<u16, LidarError> {
    if frame[..2] != FRAME_HEADER {
        return Err(LidarError::BadHeader(frame[0], frame[1]));
    }

    let computed = checksum(frame);
    if computed != frame[8] {
        return Err(LidarError::Checksum {
            computed,
            received: frame[8],
        });
    }

    let distance = u16::from_le_bytes([frame[2], frame[3]]);
    if !(MIN_DISTANCE_CM..=MAX_DISTANCE_CM).contains(&distance) {
        return Err(LidarError::OutOfRange(distance));
    }
    Ok(distance)
}

/// Build a well-formed frame for `distance` (used by simulators and tests).
pub fn encode_frame(distance: u16, strength: u16) -> Frame {
    let [d_lo, d_hi] = distance.to_le_bytes();
    let [s_lo, s_hi] = strength.to_le_bytes();
    let mut frame = [0x59, 0x59, d_lo, d_hi, s_lo, s_hi, 0, 0, 0];
    frame[8] = checksum(&frame);
    frame
}

fn checksum(frame: &Frame) -> u8 {
    frame[..8].iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Source of raw LiDAR frames.
pub trait RangeSensor: Send {
    fn read_frame(&mut self) -> Result<Frame, LidarError>;

    fn close(&mut self);
}

pub struct SerialRangeSensor {
    port: Option<Box<dyn serialport::SerialPort>>,
    path: String,
}

impl SerialRangeSensor {
    pub fn open(config: &LidarConfig) -> Result<Self, LidarError> {
        let port = serialport::new(&config.port, config.baud_rate)
            .timeout(Duration::from_millis(config.read_timeout_ms))
            .open()
            .map_err(|e| LidarError::Open {
                port: config.port.clone(),
                reason: e.to_string(),
            })?;

        if let Err(e) = port.clear(serialport::ClearBuffer::Input) {
            warn!("LiDAR: failed to flush input on {}: {}", config.port, e);
        }

        info!("LiDAR connected on {}", config.port);
        Ok(Self {
            port: Some(port),
            path: config.port.clone(),
        })
    }
}

impl RangeSensor for SerialRangeSensor {
    fn read_frame(&mut self) -> Result<Frame, LidarError> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| LidarError::Io("port closed".to_string()))?;

        // Always read a fresh frame rather than a stale buffered one.
        port.clear(serialport::ClearBuffer::Input)
            .map_err(|e| LidarError::Io(e.to_string()))?;

        let mut frame = [0u8; FRAME_LEN];
        port.read_exact(&mut frame)?;
        Ok(frame)
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            info!("LiDAR disconnected from {}", self.path);
        }
    }
}

/// Consecutive-failure counter that trips once per `threshold` failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailSafe {
    threshold: u32,
    failures: u32,
}

impl FailSafe {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    /// Count a failure. Returns true when this failure trips the fail-safe,
    /// in which case the counter starts over.
    pub fn record_failure(&mut self) -> bool {
        self.failures += 1;
        if self.failures >= self.threshold {
            self.failures = 0;
            true
        } else {
            false
        }
    }
}

impl Default for FailSafe {
    fn default() -> Self {
        Self::new(DEFAULT_FAIL_SAFE_THRESHOLD)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadOutcome {
    Valid(u16),
    Invalid { consecutive_failures: u32 },
    /// Zero distance was published.
    FailSafe,
}

pub struct LidarWorker<S: RangeSensor> {
    sensor: S,
    state: Arc<SharedState>,
    fail_safe: FailSafe,
    period: Duration,
    last_error: Option<String>,
}

impl<S: RangeSensor> LidarWorker<S> {
    /// Take ownership of an open sensor and enable ranging in shared state.
    pub fn new(sensor: S, state: Arc<SharedState>, config: &LidarConfig) -> Self {
        state.set_ranging_available();
        Self {
            sensor,
            state,
            fail_safe: FailSafe::new(config.fail_safe_threshold),
            period: Duration::from_secs(1) / config.poll_hz.max(1),
            last_error: None,
        }
    }

    pub fn fail_safe(&self) -> &FailSafe {
        &self.fail_safe
    }

    pub fn poll_once(&mut self) -> ReadOutcome {
        let result = self.sensor.read_frame().and_then(|frame| decode_frame(&frame));

        match result {
            Ok(distance) => {
                self.fail_safe.record_success();
                self.state
                    .publish_ranging(RangingSample::valid(i32::from(distance)));
                ReadOutcome::Valid(distance)
            }
            Err(e) => {
                self.log_error(&e);
                if self.fail_safe.record_failure() {
                    warn!("LiDAR fail-safe: no valid reading, publishing zero distance");
                    self.state.publish_ranging(RangingSample::fail_safe());
                    ReadOutcome::FailSafe
                } else {
                    let failures = self.fail_safe.failures();
                    self.state.record_ranging_failure(failures);
                    ReadOutcome::Invalid {
                        consecutive_failures: failures,
                    }
                }
            }
        }
    }

    /// Poll at the configured rate until stopped, then close and clear the distance.
    pub fn run(mut self, flag: RunFlag) {
        info!("LiDAR worker running at {:?} per read", self.period);
        while flag.is_running() {
            let started = Instant::now();
            self.poll_once();
            if !flag.sleep_remaining(started, self.period) {
                break;
            }
        }
        self.shutdown();
    }

    pub fn shutdown(&mut self) {
        self.sensor.close();
        self.state.clear_ranging();
        info!("LiDAR worker stopped");
    }

    fn log_error(&mut self, error: &LidarError) {
        match error {
            LidarError::Io(text) => {
                if self.last_error.as_deref() != Some(text.as_str()) {
                    warn!("LiDAR read error: {}", text);
                    self.last_error = Some(text.clone());
                }
            }
            other => trace!("LiDAR frame rejected: {}", other),
        }
    }
}
