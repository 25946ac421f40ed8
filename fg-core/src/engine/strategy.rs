//! Control laws
//!
//! The controller's state machine decides *when* to calibrate and when to
//! correct; a `ControlStrategy` decides *how*. `BiasRatioStrategy` calibrates a
//! bias from the performance curve, then applies a proportional-ratio correction.

use tracing::{debug, info};

use super::bias::BiasEstimator;
use super::curve::PerformanceCurve;
use crate::constants::control;
use crate::data::GovernorSettings;

/// Filtered inputs for one controller tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlSample {
    pub wanted_fps: f64,
    /// Filtered frame rate
    pub actual_fps: f64,
    /// Filtered package power
    pub actual_tdp: f64,
    /// Setpoint that was in effect for `actual_fps`
    pub reference_tdp: f64,
}

/// What one calibration tick decided
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationStep {
    /// First calibration: start from the measured package power
    Seed(f64),
    /// New bias setpoint
    Bias(f64),
    /// Waiting for the last bias to show up in the frame rate
    Waiting,
    /// Calibration finished; hand over to correction
    Converged,
}

pub trait ControlStrategy: Send {
    fn name(&self) -> &'static str;

    /// Called on every entry into calibration
    fn begin_calibration(&mut self);

    /// One calibration tick; `setpoint` is `None` until the controller has produced one
    fn calibrate(
        &mut self,
        sample: &ControlSample,
        setpoint: Option<f64>,
        curve: &mut PerformanceCurve,
    ) -> CalibrationStep;

    /// One correction tick; returns the new (unclamped) setpoint
    fn correct(&mut self, sample: &ControlSample, setpoint: f64) -> f64;
}

/// Bias calibration followed by proportional-ratio correction
#[derive(Debug, Clone)]
pub struct BiasRatioStrategy {
    estimator: BiasEstimator,
    attempt_budget: u32,
    tolerance_percent: f64,
    cooldown_ms: u64,
    tick_ms: u64,
    attempts: u32,
    cooldown_left_ms: u64,
}

impl BiasRatioStrategy {
    pub fn new(
        estimator: BiasEstimator,
        attempt_budget: u32,
        tolerance_percent: f64,
        cooldown_ms: u64,
        tick_ms: u64,
    ) -> Self {
        Self {
            estimator,
            attempt_budget,
            tolerance_percent,
            cooldown_ms,
            tick_ms,
            attempts: 0,
            cooldown_left_ms: 0,
        }
    }

    pub fn from_settings(settings: &GovernorSettings) -> Self {
        let c = &settings.control;
        Self::new(
            BiasEstimator::new(c.min_tdp_watts, c.max_tdp_watts),
            c.bias_attempt_budget,
            c.bias_tolerance_percent,
            settings.bias_cooldown_ms(),
            settings.intervals.auto_tdp_ms,
        )
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn cooldown_left_ms(&self) -> u64 {
        self.cooldown_left_ms
    }
}

impl ControlStrategy for BiasRatioStrategy {
    fn name(&self) -> &'static str {
        "bias-ratio"
    }

    fn begin_calibration(&mut self) {
        self.attempts = 0;
        self.cooldown_left_ms = 0;
    }

    fn calibrate(
        &mut self,
        sample: &ControlSample,
        setpoint: Option<f64>,
        curve: &mut PerformanceCurve,
    ) -> CalibrationStep {
        if setpoint.is_none() {
            info!("AutoTDP seeding setpoint from package power {:.2} W", sample.actual_tdp);
            return CalibrationStep::Seed(sample.actual_tdp);
        }

        if self.cooldown_left_ms > 0 {
            self.cooldown_left_ms = self.cooldown_left_ms.saturating_sub(self.tick_ms);
            return CalibrationStep::Waiting;
        }

        let error_percent =
            (sample.wanted_fps - sample.actual_fps).abs() / sample.wanted_fps * 100.0;
        if self.attempts < self.attempt_budget && error_percent > self.tolerance_percent {
            self.attempts += 1;
            self.cooldown_left_ms = self.cooldown_ms;
            let bias = self.estimator.compute_bias(
                curve,
                sample.wanted_fps,
                sample.actual_fps,
                sample.reference_tdp,
            );
            debug!(
                attempt = self.attempts,
                error_percent, bias, "AutoTDP bias attempt"
            );
            return CalibrationStep::Bias(bias);
        }

        info!(
            "AutoTDP calibration done after {} attempts ({:.1}% error)",
            self.attempts, error_percent
        );
        CalibrationStep::Converged
    }

    fn correct(&mut self, sample: &ControlSample, setpoint: f64) -> f64 {
        let actual = sample
            .actual_fps
            .clamp(control::FPS_SANE_MIN, control::FPS_SANE_MAX);
        let error = (sample.wanted_fps - sample.actual_fps)
            .clamp(control::ERROR_CLAMP_LOW, control::ERROR_CLAMP_HIGH);
        setpoint + error * sample.reference_tdp / actual
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CurveNode;

    fn curve() -> PerformanceCurve {
        PerformanceCurve::new(vec![
            CurveNode::new(5.0, 15.0),
            CurveNode::new(10.0, 54.0),
            CurveNode::new(15.0, 74.0),
            CurveNode::new(20.0, 80.0),
            CurveNode::new(25.0, 84.0),
        ])
        .unwrap()
    }

    fn strategy() -> BiasRatioStrategy {
        BiasRatioStrategy::new(BiasEstimator::new(5.0, 25.0), 3, 10.0, 300, 100)
    }

    fn sample(actual_fps: f64) -> ControlSample {
        ControlSample {
            wanted_fps: 60.0,
            actual_fps,
            actual_tdp: 14.0,
            reference_tdp: 15.0,
        }
    }

    #[test]
    fn test_first_calibration_seeds_from_power() {
        let mut s = strategy();
        let mut c = curve();
        assert_eq!(
            s.calibrate(&sample(40.0), None, &mut c),
            CalibrationStep::Seed(14.0)
        );
        assert_eq!(s.attempts(), 0);
    }

    #[test]
    fn test_within_tolerance_converges() {
        let mut s = strategy();
        let mut c = curve();
        assert_eq!(
            s.calibrate(&sample(57.0), Some(15.0), &mut c),
            CalibrationStep::Converged
        );
    }

    #[test]
    fn test_bias_attempts_respect_cooldown_and_budget() {
        let mut s = strategy();
        let mut c = curve();
        let mut biases = 0;
        let mut waits = 0;
        loop {
            match s.calibrate(&sample(30.0), Some(15.0), &mut c) {
                CalibrationStep::Bias(b) => {
                    assert!((5.0..=25.0).contains(&b));
                    biases += 1;
                }
                CalibrationStep::Waiting => waits += 1,
                CalibrationStep::Converged => break,
                CalibrationStep::Seed(_) => panic!("unexpected seed"),
            }
        }
        assert_eq!(biases, 3);
        assert_eq!(waits, 3 * 3);

        s.begin_calibration();
        assert!(matches!(
            s.calibrate(&sample(30.0), Some(15.0), &mut c),
            CalibrationStep::Bias(_)
        ));
    }

    #[test]
    fn test_ratio_correction() {
        let mut s = strategy();
        let mut ctl = ControlSample {
            wanted_fps: 60.0,
            actual_fps: 50.0,
            actual_tdp: 10.0,
            reference_tdp: 10.0,
        };
        // +10 fps error, 10 W / 50 fps -> +2 W
        assert!((s.correct(&ctl, 12.0) - 14.0).abs() < 1e-9);

        // large positive error clamps at +15
        ctl.actual_fps = 20.0;
        assert!((s.correct(&ctl, 12.0) - (12.0 + 15.0 * 10.0 / 20.0)).abs() < 1e-9);

        // overshoot clamps at -5
        ctl.actual_fps = 100.0;
        assert!((s.correct(&ctl, 12.0) - (12.0 - 5.0 * 10.0 / 100.0)).abs() < 1e-9);

        // absurd frame rates are bounded before dividing
        ctl.actual_fps = 0.0;
        assert!((s.correct(&ctl, 12.0) - (12.0 + 15.0 * 10.0)).abs() < 1e-9);
    }
}
