//! Performance curve engine
//!
//! Maps a power limit to the frame rate the running game is expected to reach,
//! and back.
//!
//! # How It Works
//!
//! 1. **Forward interpolation**: `expected_fps(tdp)` interpolates linearly between
//!    the breakpoints bracketing `tdp`. Queries outside the table return the
//!    boundary value.
//!
//! 2. **Inverse interpolation**: `required_tdp(fps)` walks the same table by
//!    expected frame rate to find the power limit that should produce `fps`.
//!
//! 3. **Self-calibration**: `rescale(observed, predicted)` multiplies every
//!    breakpoint by a damped observed/predicted ratio, so repeated corrections
//!    pull the curve toward the game's real behaviour without one noisy sample
//!    moving it all the way.

use tracing::{trace, warn};

use crate::constants::curve as curve_const;
use crate::data::{validate_curve_nodes, CurveNode};
use crate::error::Result;

/// TDP/FPS breakpoint table for the running application
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceCurve {
    /// Ordered by strictly increasing `tdp_watts`, at least two entries
    nodes: Vec<CurveNode>,
    damping: f64,
}

fn lerp(x: f64, x0: f64, x1: f64, y0: f64, y1: f64) -> f64 {
    let span = x1 - x0;
    if span.abs() < curve_const::FLOAT_EPSILON {
        return y1;
    }
    y0 + (x - x0) * (y1 - y0) / span
}

impl PerformanceCurve {
    /// Create a curve from validated breakpoints
    pub fn new(nodes: Vec<CurveNode>) -> Result<Self> {
        validate_curve_nodes(&nodes)?;
        let mut curve = Self {
            nodes,
            damping: curve_const::DEFAULT_DAMPING,
        };
        curve.refresh_process_gains();
        Ok(curve)
    }

    /// Set the rescale damping factor
    ///
    /// # Arguments
    /// * `damping` - fraction of the observed error applied per rescale (0.0 - 0.99)
    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping.clamp(curve_const::MIN_DAMPING, curve_const::MAX_DAMPING);
        self
    }

    pub fn damping(&self) -> f64 {
        self.damping
    }

    pub fn nodes(&self) -> &[CurveNode] {
        &self.nodes
    }

    fn first(&self) -> &CurveNode {
        &self.nodes[0]
    }

    fn last(&self) -> &CurveNode {
        &self.nodes[self.nodes.len() - 1]
    }

    pub fn min_tdp(&self) -> f64 {
        self.first().tdp_watts
    }

    pub fn max_tdp(&self) -> f64 {
        self.last().tdp_watts
    }

    /// Lowest and highest expected frame rate in the table
    pub fn fps_range(&self) -> (f64, f64) {
        self.nodes
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), n| {
                (lo.min(n.expected_fps), hi.max(n.expected_fps))
            })
    }

    /// Expected frame rate at `tdp`, clamped to the table's TDP range
    pub fn expected_fps(&self, tdp: f64) -> f64 {
        if tdp.is_nan() {
            return self.first().expected_fps;
        }
        let tdp = tdp.clamp(self.min_tdp(), self.max_tdp());

        for window in self.nodes.windows(2) {
            let (lower, upper) = (&window[0], &window[1]);
            if tdp <= upper.tdp_watts {
                return lerp(
                    tdp,
                    lower.tdp_watts,
                    upper.tdp_watts,
                    lower.expected_fps,
                    upper.expected_fps,
                );
            }
        }
        self.last().expected_fps
    }

    /// TDP needed to reach `fps`
    ///
    /// Above the table's last frame rate returns the highest TDP; at or below
    /// the first returns the lowest.
    pub fn required_tdp(&self, fps: f64) -> f64 {
        if fps.is_nan() {
            return self.min_tdp();
        }
        if fps > self.last().expected_fps {
            trace!("{:.1} fps above curve, using max tdp", fps);
            return self.max_tdp();
        }
        if fps <= self.first().expected_fps {
            trace!("{:.1} fps below curve, using min tdp", fps);
            return self.min_tdp();
        }

        // first breakpoint reaching fps; index 0 is excluded by the check above
        match self.nodes.iter().position(|n| fps <= n.expected_fps) {
            Some(i) => {
                let (lower, upper) = (&self.nodes[i - 1], &self.nodes[i]);
                lerp(
                    fps,
                    lower.expected_fps,
                    upper.expected_fps,
                    lower.tdp_watts,
                    upper.tdp_watts,
                )
            }
            None => self.max_tdp(),
        }
    }

    /// Pull the curve toward an observation
    ///
    /// Returns the damped ratio that was applied (1.0 when the inputs were unusable).
    pub fn rescale(&mut self, observed_fps: f64, predicted_fps: f64) -> f64 {
        let usable = predicted_fps.is_finite()
            && observed_fps.is_finite()
            && predicted_fps > 0.0
            && observed_fps > 0.0;
        if !usable {
            warn!(
                "Skipping curve rescale: observed {} / predicted {}",
                observed_fps, predicted_fps
            );
            return 1.0;
        }

        let ratio = observed_fps / predicted_fps;
        let damped = 1.0 + (ratio - 1.0) * self.damping;
        for node in &mut self.nodes {
            node.expected_fps *= damped;
        }
        self.refresh_process_gains();
        trace!("Curve rescaled: ratio {:.3}, applied {:.3}", ratio, damped);
        damped
    }

    /// Recompute every node's local ΔFPS/ΔTDP
    ///
    /// Interior nodes use the mean of the slopes to both neighbours; edge nodes
    /// use their single neighbour.
    pub fn refresh_process_gains(&mut self) {
        let slopes: Vec<f64> = self
            .nodes
            .windows(2)
            .map(|w| {
                let dt = w[1].tdp_watts - w[0].tdp_watts;
                if dt.abs() < curve_const::FLOAT_EPSILON {
                    0.0
                } else {
                    ((w[1].expected_fps - w[0].expected_fps) / dt).abs()
                }
            })
            .collect();

        let count = self.nodes.len();
        for (i, node) in self.nodes.iter_mut().enumerate() {
            node.process_gain = match i {
                0 => slopes[0],
                _ if i == count - 1 => slopes[i - 1],
                _ => (slopes[i - 1] + slopes[i]) / 2.0,
            };
        }
    }

    /// Process gain at the operating point `fps`, interpolated over the frame rate axis
    pub fn process_gain(&self, fps: f64) -> f64 {
        if fps.is_nan() || fps <= self.first().expected_fps {
            return self.first().process_gain;
        }
        if fps >= self.last().expected_fps {
            return self.last().process_gain;
        }
        match self.nodes.iter().position(|n| fps <= n.expected_fps) {
            Some(i) => {
                let (lower, upper) = (&self.nodes[i - 1], &self.nodes[i]);
                lerp(
                    fps,
                    lower.expected_fps,
                    upper.expected_fps,
                    lower.process_gain,
                    upper.process_gain,
                )
            }
            None => self.last().process_gain,
        }
    }
}

impl Default for PerformanceCurve {
    fn default() -> Self {
        let mut curve = Self {
            nodes: crate::constants::default_curve::baseline(),
            damping: curve_const::DEFAULT_DAMPING,
        };
        curve.refresh_process_gains();
        curve
    }
}
