//! One-Euro filter
//!
//! Adaptive low-pass filter: heavy smoothing while the signal is steady, less
//! lag once it starts moving. `min_cutoff` sets the jitter floor, `beta` how
//! quickly the cutoff opens up with speed.

use std::f64::consts::PI;

use crate::constants::filter;

#[derive(Debug, Clone)]
pub struct OneEuroFilter {
    min_cutoff: f64,
    beta: f64,
    derivative_cutoff: f64,
    last_value: Option<f64>,
    last_derivative: f64,
}

fn smoothing_factor(cutoff: f64, dt: f64) -> f64 {
    let tau = 1.0 / (2.0 * PI * cutoff);
    1.0 / (1.0 + tau / dt)
}

impl OneEuroFilter {
    pub fn new(min_cutoff: f64, beta: f64) -> Self {
        Self {
            min_cutoff: min_cutoff.max(f64::MIN_POSITIVE),
            beta: beta.max(0.0),
            derivative_cutoff: filter::DERIVATIVE_CUTOFF,
            last_value: None,
            last_derivative: 0.0,
        }
    }

    /// Filter tuned for frame rate samples
    pub fn for_framerate() -> Self {
        Self::new(filter::FPS_MIN_CUTOFF, filter::FPS_BETA)
    }

    /// Filter tuned for package power samples
    pub fn for_power() -> Self {
        Self::new(filter::TDP_MIN_CUTOFF, filter::TDP_BETA)
    }

    /// Feed one sample taken `dt_secs` after the previous one
    ///
    /// The first sample passes through unchanged. A non-positive `dt_secs`
    /// returns the previous output.
    pub fn filter(&mut self, value: f64, dt_secs: f64) -> f64 {
        let prev = match self.last_value {
            None => {
                self.last_value = Some(value);
                self.last_derivative = 0.0;
                return value;
            }
            Some(prev) => prev,
        };
        if dt_secs <= 0.0 || !dt_secs.is_finite() {
            return prev;
        }

        let derivative = (value - prev) / dt_secs;
        let a_d = smoothing_factor(self.derivative_cutoff, dt_secs);
        let derivative = a_d * derivative + (1.0 - a_d) * self.last_derivative;

        let cutoff = self.min_cutoff + self.beta * derivative.abs();
        let a = smoothing_factor(cutoff, dt_secs);
        let out = a * value + (1.0 - a) * prev;

        self.last_value = Some(out);
        self.last_derivative = derivative;
        out
    }

    /// Last output, if any sample was seen
    pub fn value(&self) -> Option<f64> {
        self.last_value
    }

    pub fn reset(&mut self) {
        self.last_value = None;
        self.last_derivative = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_passes_through() {
        let mut f = OneEuroFilter::for_framerate();
        assert_eq!(f.filter(60.0, 0.1), 60.0);
        assert_eq!(f.value(), Some(60.0));
    }

    #[test]
    fn test_constant_signal_is_stable() {
        let mut f = OneEuroFilter::for_power();
        for _ in 0..50 {
            assert!((f.filter(15.0, 0.1) - 15.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_step_is_smoothed_and_converges() {
        let mut f = OneEuroFilter::for_framerate();
        f.filter(30.0, 0.1);
        let first = f.filter(60.0, 0.1);
        assert!(first > 30.0 && first < 60.0);

        let mut out = first;
        for _ in 0..600 {
            out = f.filter(60.0, 0.1);
        }
        assert!((out - 60.0).abs() < 0.5);
    }

    #[test]
    fn test_faster_movement_lags_less() {
        // Same step, higher beta opens the cutoff more
        let mut slow = OneEuroFilter::new(0.15, 0.0);
        let mut fast = OneEuroFilter::new(0.15, 1.0);
        slow.filter(0.0, 0.1);
        fast.filter(0.0, 0.1);
        assert!(fast.filter(100.0, 0.1) > slow.filter(100.0, 0.1));
    }

    #[test]
    fn test_reset_and_zero_dt() {
        let mut f = OneEuroFilter::for_framerate();
        f.filter(40.0, 0.1);
        assert_eq!(f.filter(80.0, 0.0), 40.0);
        f.reset();
        assert_eq!(f.value(), None);
        assert_eq!(f.filter(80.0, 0.1), 80.0);
    }
}
