use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Declared raw range of one absolute axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisRange {
    pub min: i32,
    pub max: i32,
}

impl AxisRange {
    pub fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    /// Map to `[-1, 1]` about the midpoint. Magnitudes below `deadzone` become exactly 0.
    pub fn normalize_stick(&self, value: i32, deadzone: f32) -> f32 {
        let center = (f64::from(self.min) + f64::from(self.max)) / 2.0;
        let half_range = (f64::from(self.max) - f64::from(self.min)) / 2.0;
        if half_range <= 0.0 {
            return 0.0;
        }

        let normalized = ((f64::from(value) - center) / half_range) as f32;
        if normalized.abs() < deadzone {
            0.0
        } else {
            normalized.clamp(-1.0, 1.0)
        }
    }

    /// Map to `[0, 1]` from the declared minimum.
    pub fn normalize_trigger(&self, value: i32) -> f32 {
        let span = f64::from(self.max) - f64::from(self.min);
        if span <= 0.0 {
            return 0.0;
        }
        (((f64::from(value) - f64::from(self.min)) / span) as f32).clamp(0.0, 1.0)
    }
}

impl Default for AxisRange {
    /// Range assumed for axes the device did not declare.
    fn default() -> Self {
        Self { min: 0, max: 255 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    ranges: HashMap<u16, AxisRange>,
    deadzone: f32,
}

impl Calibration {
    pub fn new(deadzone: f32) -> Self {
        Self {
            ranges: HashMap::new(),
            deadzone,
        }
    }

    pub fn from_ranges(ranges: impl IntoIterator<Item = (u16, AxisRange)>, deadzone: f32) -> Self {
        Self {
            ranges: ranges.into_iter().collect(),
            deadzone,
        }
    }

    pub fn deadzone(&self) -> f32 {
        self.deadzone
    }

    pub fn range(&self, code: u16) -> AxisRange {
        self.ranges.get(&code).copied().unwrap_or_default()
    }

    pub fn stick(&self, code: u16, value: i32) -> f32 {
        self.range(code).normalize_stick(value, self.deadzone)
    }

    pub fn trigger(&self, code: u16, value: i32) -> f32 {
        self.range(code).normalize_trigger(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undeclared_axis_uses_byte_range() {
        let cal = Calibration::new(0.1);
        assert_eq!(cal.trigger(0x02, 255), 1.0);
        assert_eq!(cal.trigger(0x02, 0), 0.0);
    }

    #[test]
    fn test_degenerate_range_is_neutral() {
        let range = AxisRange::new(5, 5);
        assert_eq!(range.normalize_stick(7, 0.0), 0.0);
        assert_eq!(range.normalize_trigger(7), 0.0);
    }
}
