//! Rolling stage means.

use std::collections::VecDeque;

use crate::round2;

/// Mean of the positive values among the last `window` samples.
///
/// Zero and negative samples still occupy a slot in the window but do not
/// count toward the mean, so ticks where a stage delivered nothing do not
/// drag the daily mean down.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingMean {
    window: usize,
    samples: VecDeque<f64>,
}

impl RollingMean {
    /// Create an empty window of `window` samples (at least one).
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
        }
    }

    /// Add a sample, evicting the oldest when the window is full. Returns
    /// the updated mean.
    pub fn push(&mut self, value: f64) -> f64 {
        if self.samples.len() >= self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
        self.mean()
    }

    /// Mean of positive samples, rounded to two decimals; zero when none.
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self) -> f64 {
        let (sum, count) = self
            .samples
            .iter()
            .filter(|v| **v > 0.0)
            .fold((0.0, 0_usize), |(sum, count), v| {
                (sum + v, count.saturating_add(1))
            });
        round2(crate::ratio_or_zero(sum, count as f64))
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no sample has been pushed yet.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_non_positive_samples() {
        let mut mean = RollingMean::new(4);
        mean.push(10.0);
        mean.push(0.0);
        assert!((mean.push(20.0) - 15.0).abs() < 1e-12);
        assert_eq!(mean.len(), 3);
    }

    #[test]
    fn evicts_oldest() {
        let mut mean = RollingMean::new(2);
        mean.push(100.0);
        mean.push(2.0);
        assert!((mean.push(4.0) - 3.0).abs() < 1e-12);
        assert_eq!(mean.len(), 2);
    }

    #[test]
    fn rounds_to_two_decimals() {
        let mut mean = RollingMean::new(96);
        mean.push(1.0);
        mean.push(1.0);
        assert!((mean.push(2.0) - 1.33).abs() < 1e-12);
    }

    #[test]
    fn empty_or_idle_window_is_zero() {
        let mut mean = RollingMean::new(0);
        assert!(mean.is_empty());
        assert!(mean.mean().abs() < f64::EPSILON);
        assert!(mean.push(0.0).abs() < f64::EPSILON);
    }
}
