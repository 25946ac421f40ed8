//! Controller output bias
//!
//! Converts (wanted fps, actual fps, reference tdp) into the power limit the
//! curve predicts for the wanted frame rate. Every estimate first rescales the
//! curve with the observation, so calibration and inversion happen together.

use tracing::debug;

use super::curve::PerformanceCurve;
use crate::constants::control;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiasEstimator {
    min_tdp: f64,
    max_tdp: f64,
}

impl BiasEstimator {
    pub fn new(min_tdp: f64, max_tdp: f64) -> Self {
        Self { min_tdp, max_tdp }
    }

    pub fn limits(&self) -> (f64, f64) {
        (self.min_tdp, self.max_tdp)
    }

    /// Compute the bias TDP, nudging `curve` toward the observation first
    pub fn compute_bias(
        &self,
        curve: &mut PerformanceCurve,
        wanted_fps: f64,
        actual_fps: f64,
        reference_tdp: f64,
    ) -> f64 {
        let reference_tdp = reference_tdp.clamp(self.min_tdp, self.max_tdp);
        let actual_fps = actual_fps.clamp(control::BIAS_FPS_MIN, control::BIAS_FPS_MAX);

        let expected = curve.expected_fps(reference_tdp);
        let applied = curve.rescale(actual_fps, expected);
        let bias = curve
            .required_tdp(wanted_fps)
            .clamp(self.min_tdp, self.max_tdp);

        debug!(
            reference_tdp,
            expected_fps = expected,
            actual_fps,
            ratio = applied,
            bias,
            "Controller output bias"
        );
        bias
    }
}
