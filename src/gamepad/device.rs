//! Gamepad device discovery.

use serde::{Deserialize, Serialize};

use super::calibration::AxisRange;
use super::GamepadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawEvent {
    Axis { code: u16, value: i32 },
    Button { code: u16, pressed: bool },
}

pub trait GamepadDevice: Send {
    fn name(&self) -> &str;

    /// Declared min/max for every absolute axis the device exposes.
    fn axis_ranges(&self) -> Vec<(u16, AxisRange)>;

    /// Block until at least one event is available. An error means the device is gone.
    fn read_events(&mut self) -> Result<Vec<RawEvent>, GamepadError>;
}

pub trait GamepadBackend: Send {
    /// Return the first attached joystick-like device, if any.
    fn discover(&mut self) -> Result<Option<Box<dyn GamepadDevice>>, GamepadError>;
}

/// Backend for builds without input device support; never finds a controller.
#[derive(Debug, Default)]
pub struct NoGamepadBackend;

impl GamepadBackend for NoGamepadBackend {
    fn discover(&mut self) -> Result<Option<Box<dyn GamepadDevice>>, GamepadError> {
        Ok(None)
    }
}

/// The platform's default backend.
pub fn default_backend() -> Box<dyn GamepadBackend> {
    #[cfg(all(target_os = "linux", feature = "evdev"))]
    {
        Box::new(evdev_backend::EvdevBackend)
    }
    #[cfg(not(all(target_os = "linux", feature = "evdev")))]
    {
        Box::new(NoGamepadBackend)
    }
}

#[cfg(all(target_os = "linux", feature = "evdev"))]
pub mod evdev_backend {
    use evdev::{AbsoluteAxisType, Device, EventType};
    use std::path::PathBuf;
    use tracing::info;

    use super::{GamepadBackend, GamepadDevice, RawEvent};
    use crate::gamepad::calibration::AxisRange;
    use crate::gamepad::GamepadError;

    /// Scans `/dev/input/event*` for a device exposing both ABS_X and ABS_Y.
    #[derive(Debug, Default)]
    pub struct EvdevBackend;

    impl GamepadBackend for EvdevBackend {
        fn discover(&mut self) -> Result<Option<Box<dyn GamepadDevice>>, GamepadError> {
            for (path, device) in evdev::enumerate() {
                let is_joystick = device.supported_absolute_axes().map_or(false, |axes| {
                    axes.contains(AbsoluteAxisType::ABS_X) && axes.contains(AbsoluteAxisType::ABS_Y)
                });
                if is_joystick {
                    let gamepad = EvdevGamepad::open(path, device)?;
                    info!("Found gamepad: {}", gamepad.name);
                    return Ok(Some(Box::new(gamepad)));
                }
            }
            Ok(None)
        }
    }

    pub struct EvdevGamepad {
        device: Device,
        name: String,
        ranges: Vec<(u16, AxisRange)>,
    }

    impl EvdevGamepad {
        fn open(path: PathBuf, device: Device) -> Result<Self, GamepadError> {
            let name = format!(
                "{} at {}",
                device.name().unwrap_or("unnamed gamepad"),
                path.display()
            );

            let absinfo = device.get_abs_state().map_err(|e| GamepadError::Calibration {
                device: name.clone(),
                reason: e.to_string(),
            })?;

            let ranges = device
                .supported_absolute_axes()
                .map(|axes| {
                    axes.iter()
                        .filter_map(|axis| {
                            let info = absinfo.get(usize::from(axis.0))?;
                            Some((axis.0, AxisRange::new(info.minimum, info.maximum)))
                        })
                        .collect()
                })
                .unwrap_or_default();

            Ok(Self {
                device,
                name,
                ranges,
            })
        }
    }

    impl GamepadDevice for EvdevGamepad {
        fn name(&self) -> &str {
            &self.name
        }

        fn axis_ranges(&self) -> Vec<(u16, AxisRange)> {
            self.ranges.clone()
        }

        fn read_events(&mut self) -> Result<Vec<RawEvent>, GamepadError> {
            let events = self
                .device
                .fetch_events()
                .map_err(|e| GamepadError::Disconnected(e.to_string()))?;

            Ok(events
                .filter_map(|event| match event.event_type() {
                    EventType::ABSOLUTE => Some(RawEvent::Axis {
                        code: event.code(),
                        value: event.value(),
                    }),
                    EventType::KEY => Some(RawEvent::Button {
                        code: event.code(),
                        pressed: event.value() != 0,
                    }),
                    _ => None,
                })
                .collect())
        }
    }
}
