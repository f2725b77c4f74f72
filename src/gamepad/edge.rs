use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Edge {
    Rising,
    Falling,
    Steady,
}

/// Remembers the previous level of one digital input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EdgeDetector {
    previous: bool,
}

impl EdgeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, current: bool) -> Edge {
        let edge = match (self.previous, current) {
            (false, true) => Edge::Rising,
            (true, false) => Edge::Falling,
            _ => Edge::Steady,
        };
        self.previous = current;
        edge
    }

    /// Update and report whether this sample is a not-pressed → pressed transition.
    pub fn rising(&mut self, current: bool) -> bool {
        self.update(current) == Edge::Rising
    }

    pub fn reset(&mut self) {
        self.previous = false;
    }
}

/// Change detector for a multi-valued input such as a d-pad axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValueEdge<T> {
    previous: T,
}

impl<T: Copy + PartialEq + Default> ValueEdge<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Some(current)` when the value differs from the previous sample.
    pub fn update(&mut self, current: T) -> Option<T> {
        if current == self.previous {
            None
        } else {
            self.previous = current;
            Some(current)
        }
    }

    pub fn reset(&mut self) {
        self.previous = T::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_held_input_fires_once() {
        let mut edge = EdgeDetector::new();
        assert!(edge.rising(true));
        assert!(!edge.rising(true));
        assert_eq!(edge.update(false), Edge::Falling);
        assert!(edge.rising(true));
    }

    #[test]
    fn test_value_edge_reports_changes_only() {
        let mut dpad = ValueEdge::<i8>::new();
        assert_eq!(dpad.update(0), None);
        assert_eq!(dpad.update(-1), Some(-1));
        assert_eq!(dpad.update(-1), None);
        assert_eq!(dpad.update(0), Some(0));
    }
}
