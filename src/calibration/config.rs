//! Engine tunables.

use std::time::Duration;

use crate::vision::{BURST_SAMPLES, CALIBRATION_SAMPLES, DEFAULT_GAMMA, DEFAULT_RETRY_BUDGET};

/// Fraction of the measured error corrected per centering move.
pub const DEFAULT_DAMPING: f64 = 0.55;

/// Configuration for the calibration engine.
#[derive(Debug, Clone)]
pub struct AlignConfig {
    /// Gamma applied before binarization.
    pub gamma: f64,
    /// Detections averaged per calibration point.
    pub calibration_samples: usize,
    /// Detections averaged per centering iteration.
    pub burst_samples: usize,
    /// Consecutive failed detections before a sample is abandoned.
    pub retry_budget: usize,
    /// Fraction of the error corrected per centering move.
    pub damping: f64,
    /// Feed rate for calibration and corrective moves (mm/min).
    pub move_speed: f64,
    /// Feed rate for travel to the controlled point (mm/min).
    pub travel_speed: f64,
    /// XY jerk limit issued before the first corrective move (mm/min).
    pub max_jerk: f64,
    /// Interval between machine status polls.
    pub poll_interval: Duration,
    /// Corrective moves allowed before giving up on a tool.
    pub max_centering_moves: u32,
    /// Reuse the first tool's transform for later tools.
    pub reuse_transform: bool,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            gamma: DEFAULT_GAMMA,
            calibration_samples: CALIBRATION_SAMPLES,
            burst_samples: BURST_SAMPLES,
            retry_budget: DEFAULT_RETRY_BUDGET,
            damping: DEFAULT_DAMPING,
            move_speed: 1000.0,
            travel_speed: 6000.0,
            max_jerk: 60.0,
            poll_interval: Duration::from_millis(250),
            max_centering_moves: 50,
            reuse_transform: false,
        }
    }
}

impl AlignConfig {
    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_samples(mut self, calibration: usize, burst: usize) -> Self {
        self.calibration_samples = calibration;
        self.burst_samples = burst;
        self
    }

    pub fn with_retry_budget(mut self, retry_budget: usize) -> Self {
        self.retry_budget = retry_budget;
        self
    }

    pub fn with_speeds(mut self, move_speed: f64, travel_speed: f64) -> Self {
        self.move_speed = move_speed;
        self.travel_speed = travel_speed;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_centering_moves(mut self, moves: u32) -> Self {
        self.max_centering_moves = moves;
        self
    }

    /// Reuse one transform for every tool, assuming camera geometry is fixed.
    pub fn with_transform_reuse(mut self, reuse: bool) -> Self {
        self.reuse_transform = reuse;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_config_default() {
        let config = AlignConfig::default();
        assert_eq!(config.calibration_samples, 5);
        assert_eq!(config.burst_samples, 3);
        assert_eq!(config.retry_budget, 5);
        assert_eq!(config.damping, 0.55);
        assert!(!config.reuse_transform);
    }

    #[test]
    fn test_align_config_builder() {
        let config = AlignConfig::default()
            .with_gamma(1.5)
            .with_samples(7, 2)
            .with_poll_interval(Duration::from_millis(5))
            .with_transform_reuse(true);
        assert_eq!(config.gamma, 1.5);
        assert_eq!(config.calibration_samples, 7);
        assert_eq!(config.burst_samples, 2);
        assert_eq!(config.poll_interval, Duration::from_millis(5));
        assert!(config.reuse_transform);
    }
}
