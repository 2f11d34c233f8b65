//! Speed estimation from timestamped boxes
//!
//! Displacement is measured between box centers. Pixel distances become
//! meters through a fixed pixels-per-meter scalar, then km/h (x3.6), unless
//! the deployment reports raw pixels per second.

use crate::domain::geometry::center_displacement;
use crate::domain::types::BBox;
use crate::infra::config::{Config, SpeedUnit};

const MS_TO_KMH: f64 = 3.6;

#[derive(Debug, Clone, Copy)]
pub struct SpeedEstimator {
    unit: SpeedUnit,
    pixels_per_meter: f64,
    alpha: f64,
    min_dt: f64,
}

impl SpeedEstimator {
    pub fn new(config: &Config) -> Self {
        Self {
            unit: config.speed_unit(),
            pixels_per_meter: config.pixels_per_meter(),
            alpha: config.smoothing_alpha(),
            min_dt: config.min_dt_secs(),
        }
    }

    #[inline]
    pub fn min_dt(&self) -> f64 {
        self.min_dt
    }

    pub fn unit(&self) -> SpeedUnit {
        self.unit
    }

    /// Whether a sample `dt` seconds after the previous one is usable
    #[inline]
    pub fn accepts(&self, dt: f64) -> bool {
        dt > 0.0 && dt > self.min_dt
    }

    /// Instantaneous speed between two boxes `dt` seconds apart (0 for short dt)
    pub fn estimate(&self, prev: &BBox, curr: &BBox, dt: f64) -> f64 {
        if !self.accepts(dt) {
            return 0.0;
        }
        let px_per_sec = center_displacement(prev, curr) / dt;
        match self.unit {
            SpeedUnit::PxPerSec => px_per_sec,
            SpeedUnit::Kmh => px_per_sec / self.pixels_per_meter * MS_TO_KMH,
        }
    }

    /// Exponential moving average; the first sample initializes the value
    #[inline]
    pub fn smooth(&self, prev: Option<f64>, instant: f64) -> f64 {
        match prev {
            None => instant,
            Some(p) => self.alpha * p + (1.0 - self.alpha) * instant,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> SpeedEstimator {
        SpeedEstimator::new(&Config::default())
    }

    #[test]
    fn test_reference_scenario_is_3_6_kmh() {
        let est = estimator();
        let prev = BBox::new(100.0, 100.0, 50.0, 50.0);
        let curr = BBox::new(135.0, 100.0, 50.0, 50.0);
        assert!((est.estimate(&prev, &curr, 1.0) - 3.6).abs() < 1e-9);
    }

    #[test]
    fn test_short_dt_returns_zero() {
        let est = estimator();
        let prev = BBox::new(0.0, 0.0, 10.0, 10.0);
        let curr = BBox::new(500.0, 0.0, 10.0, 10.0);
        for dt in [-1.0, 0.0, 0.001, 0.005, 0.01] {
            assert_eq!(est.estimate(&prev, &curr, dt), 0.0, "dt={dt}");
        }
        assert!(est.estimate(&prev, &curr, 0.011) > 0.0);
    }

    #[test]
    fn test_px_per_sec_skips_conversion() {
        let config: Config = Config::default();
        let mut est = SpeedEstimator::new(&config);
        est.unit = SpeedUnit::PxPerSec;
        let prev = BBox::new(0.0, 0.0, 10.0, 10.0);
        let curr = BBox::new(30.0, 40.0, 10.0, 10.0);
        assert!((est.estimate(&prev, &curr, 0.5) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_first_sample_initializes_smoothing() {
        assert_eq!(estimator().smooth(None, 42.0), 42.0);
    }

    #[test]
    fn test_smoothed_value_lies_between_previous_and_instant() {
        let est = estimator();
        let mut smoothed = est.smooth(None, 20.0);
        for instant in [60.0, 10.0, 45.5, 45.0] {
            let next = est.smooth(Some(smoothed), instant);
            let (lo, hi) = if smoothed < instant { (smoothed, instant) } else { (instant, smoothed) };
            assert!(lo < next && next < hi, "{next} not within ({lo}, {hi})");
            smoothed = next;
        }
    }

    #[test]
    fn test_smoothing_weights() {
        // 0.7 * 10 + 0.3 * 20
        assert!((estimator().smooth(Some(10.0), 20.0) - 13.0).abs() < 1e-9);
    }
}
