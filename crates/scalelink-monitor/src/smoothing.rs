//! Moving-average smoothing of decoded weights.

use std::collections::VecDeque;

/// Default number of readings averaged.
pub const DEFAULT_SMOOTHING: usize = 3;

/// Bounded FIFO of the last `capacity` readings. Never holds more than
/// `capacity` values.
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothingWindow {
    values: VecDeque<f64>,
    capacity: usize,
}

impl SmoothingWindow {
    /// A window of `capacity` readings (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        SmoothingWindow {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a reading, evicting the oldest when full. Returns the new mean.
    pub fn push(&mut self, value: f64) -> f64 {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
        self.mean().unwrap_or(value)
    }

    /// Arithmetic mean of the held readings.
    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            None
        } else {
            Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
        }
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for SmoothingWindow {
    fn default() -> Self {
        SmoothingWindow::new(DEFAULT_SMOOTHING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_over_last_n() {
        let mut w = SmoothingWindow::new(3);
        assert_eq!(w.mean(), None);
        assert_eq!(w.push(1.0), 1.0);
        assert_eq!(w.push(2.0), 1.5);
        assert_eq!(w.push(3.0), 2.0);
        assert_eq!(w.push(6.0), 11.0 / 3.0);
        assert_eq!(w.len(), 3);
    }

    #[test]
    fn length_never_exceeds_capacity() {
        let mut w = SmoothingWindow::new(2);
        for i in 0..10 {
            w.push(i as f64);
            assert!(w.len() <= w.capacity());
        }
        assert_eq!(w.mean(), Some(8.5));
    }

    #[test]
    fn clear_empties() {
        let mut w = SmoothingWindow::default();
        w.push(5.0);
        w.clear();
        assert!(w.is_empty());
        assert_eq!(w.mean(), None);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut w = SmoothingWindow::new(0);
        w.push(1.0);
        assert_eq!(w.push(4.0), 4.0);
    }
}
