use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::arbiter::DRIVER_LIMIT;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub command_bind: String,
    pub video_bind: String,
    /// Minimum gap between streamed video frames.
    pub video_frame_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            command_bind: "0.0.0.0:5003".to_string(),
            video_bind: "0.0.0.0:8003".to_string(),
            video_frame_ms: 33,
        }
    }
}

impl NetworkConfig {
    pub fn video_frame_pause(&self) -> Duration {
        Duration::from_millis(self.video_frame_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LidarConfig {
    pub enabled: bool,
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    pub poll_hz: u32,
    pub fail_safe_threshold: u32,
}

impl Default for LidarConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            read_timeout_ms: 40,
            poll_hz: 20,
            fail_safe_threshold: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GamepadConfig {
    pub enabled: bool,
    pub deadzone: f32,
    pub reconnect_delay_ms: u64,
    pub loop_hz: u32,
    pub idle_poll_ms: u64,
    /// Speed at multiplier 1.0 before leveling.
    pub motor_base: i32,
    /// Servo accumulator change per active tick.
    pub servo_step_deg: f32,
}

impl Default for GamepadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            deadzone: 0.15,
            reconnect_delay_ms: 1000,
            loop_hz: 50,
            idle_poll_ms: 100,
            motor_base: 3000,
            servo_step_deg: 2.0,
        }
    }
}

impl GamepadConfig {
    pub fn loop_period(&self) -> Duration {
        Duration::from_secs(1) / self.loop_hz.max(1)
    }

    pub fn idle_period(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub stop_timeout_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub network: NetworkConfig,
    pub lidar: LidarConfig,
    pub gamepad: GamepadConfig,
    pub supervisor: SupervisorConfig,
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            lidar: LidarConfig::default(),
            gamepad: GamepadConfig::default(),
            supervisor: SupervisorConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl DaemonConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: DaemonConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let gamepad = &self.gamepad;
        if !(0.0..1.0).contains(&gamepad.deadzone) {
            return Err(invalid("gamepad.deadzone", format!("{} not in [0, 1)", gamepad.deadzone)));
        }
        if gamepad.loop_hz == 0 {
            return Err(invalid("gamepad.loop_hz", "must be non-zero".to_string()));
        }
        if gamepad.idle_poll_ms == 0 {
            return Err(invalid("gamepad.idle_poll_ms", "must be non-zero".to_string()));
        }
        if gamepad.reconnect_delay_ms == 0 {
            return Err(invalid("gamepad.reconnect_delay_ms", "must be non-zero".to_string()));
        }
        if gamepad.motor_base <= 0 || gamepad.motor_base > DRIVER_LIMIT {
            return Err(invalid(
                "gamepad.motor_base",
                format!("{} not in 1..={}", gamepad.motor_base, DRIVER_LIMIT),
            ));
        }
        if self.lidar.poll_hz == 0 {
            return Err(invalid("lidar.poll_hz", "must be non-zero".to_string()));
        }
        if self.lidar.fail_safe_threshold == 0 {
            return Err(invalid("lidar.fail_safe_threshold", "must be non-zero".to_string()));
        }
        if self.network.video_frame_ms == 0 {
            return Err(invalid("network.video_frame_ms", "must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.supervisor.stop_timeout_ms)
    }
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { field, reason }
}
