//! AutoTDP adaptive controller
//!
//! Owns the TDP setpoint, the live performance curve and the signal filters.
//! Each tick runs, in order:
//!
//! 1. stop request -> `Idle`
//! 2. unusable telemetry -> hold (no transition, no output change)
//! 3. filter frame rate and package power
//! 4. `Idle` -> `BiasCalibration`
//! 5. record the setpoint history
//! 6. sustained curve error while in `PidControl` -> `BiasCalibration`
//! 7. frame rate target changed -> `BiasCalibration`
//! 8. run the current state and publish the clamped setpoint

use tracing::{debug, info};

use super::curve::PerformanceCurve;
use super::filter::OneEuroFilter;
use super::history::{SceneChangeDetector, SetpointHistory};
use super::strategy::{BiasRatioStrategy, CalibrationStep, ControlSample, ControlStrategy};
use crate::data::GovernorSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    BiasCalibration,
    PidControl,
}

/// Raw inputs for one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlInput {
    pub framerate: Option<f64>,
    pub package_power: Option<f64>,
    pub fps_target: f64,
    pub stop_requested: bool,
}

/// What the tick produced
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlOutput {
    /// Telemetry unusable or nothing to publish yet
    Hold,
    /// Clamped setpoint to enforce
    Setpoint(f64),
    /// Controller returned to Idle on request
    Stopped,
}

fn usable(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v != 0.0)
}

pub struct AdaptiveController {
    state: ControllerState,
    curve: PerformanceCurve,
    strategy: Box<dyn ControlStrategy>,
    fps_filter: OneEuroFilter,
    tdp_filter: OneEuroFilter,
    history: SetpointHistory,
    scene: SceneChangeDetector,
    setpoint: Option<f64>,
    previous_target: Option<f64>,
    min_tdp: f64,
    max_tdp: f64,
    tick_ms: u64,
}

impl AdaptiveController {
    pub fn new(
        curve: PerformanceCurve,
        strategy: Box<dyn ControlStrategy>,
        min_tdp: f64,
        max_tdp: f64,
        tick_ms: u64,
    ) -> Self {
        Self {
            state: ControllerState::Idle,
            curve,
            strategy,
            fps_filter: OneEuroFilter::for_framerate(),
            tdp_filter: OneEuroFilter::for_power(),
            history: SetpointHistory::new(),
            scene: SceneChangeDetector::default(),
            setpoint: None,
            previous_target: None,
            min_tdp,
            max_tdp,
            tick_ms,
        }
    }

    /// Controller with the bias-ratio strategy and tuning from settings
    pub fn from_settings(settings: &GovernorSettings, curve: PerformanceCurve) -> Self {
        let c = &settings.control;
        let mut ctl = Self::new(
            curve.with_damping(c.curve_damping),
            Box::new(BiasRatioStrategy::from_settings(settings)),
            c.min_tdp_watts,
            c.max_tdp_watts,
            settings.intervals.auto_tdp_ms,
        );
        ctl.fps_filter = OneEuroFilter::new(c.fps_filter_min_cutoff, c.fps_filter_beta);
        ctl.tdp_filter = OneEuroFilter::new(c.tdp_filter_min_cutoff, c.tdp_filter_beta);
        ctl
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn setpoint(&self) -> Option<f64> {
        self.setpoint
    }

    pub fn curve(&self) -> &PerformanceCurve {
        &self.curve
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Swap the control law; takes effect from the next calibration
    pub fn set_strategy(&mut self, strategy: Box<dyn ControlStrategy>) {
        info!("AutoTDP strategy: {} -> {}", self.strategy.name(), strategy.name());
        self.strategy = strategy;
        if self.state != ControllerState::Idle {
            self.enter_calibration("strategy changed");
        }
    }

    /// Replace the curve (e.g. a different application started)
    pub fn set_curve(&mut self, curve: PerformanceCurve) {
        let damping = self.curve.damping();
        self.curve = curve.with_damping(damping);
        if self.state != ControllerState::Idle {
            self.enter_calibration("curve replaced");
        }
    }

    fn enter_calibration(&mut self, reason: &str) {
        if self.state != ControllerState::BiasCalibration {
            info!("AutoTDP {:?} -> BiasCalibration ({})", self.state, reason);
        }
        self.state = ControllerState::BiasCalibration;
        self.strategy.begin_calibration();
        self.scene.reset();
    }

    fn reset(&mut self) {
        self.state = ControllerState::Idle;
        self.setpoint = None;
        self.previous_target = None;
        self.history.reset();
        self.scene.reset();
        self.fps_filter.reset();
        self.tdp_filter.reset();
    }

    pub fn tick(&mut self, input: &ControlInput) -> ControlOutput {
        if input.stop_requested {
            if self.state != ControllerState::Idle {
                info!("AutoTDP {:?} -> Idle (stop requested)", self.state);
            }
            self.reset();
            return ControlOutput::Stopped;
        }

        let (fps, power, target) = match (
            usable(input.framerate),
            usable(input.package_power),
            usable(Some(input.fps_target)),
        ) {
            (Some(f), Some(p), Some(t)) if t > 0.0 => (f, p, t),
            _ => return ControlOutput::Hold,
        };

        let dt = self.tick_ms as f64 / 1000.0;
        let fps = self.fps_filter.filter(fps, dt);
        let power = self.tdp_filter.filter(power, dt);

        if self.state == ControllerState::Idle {
            self.enter_calibration("telemetry available");
        }

        if let Some(sp) = self.setpoint {
            self.history.push(sp);
        }
        let reference_tdp = self.history.valid_setpoint().unwrap_or(power);

        if self.state == ControllerState::PidControl {
            let curve_error = fps / self.curve.expected_fps(reference_tdp);
            if self.scene.update(curve_error, self.tick_ms) {
                self.enter_calibration("scene change");
            }
        }

        if let Some(prev) = self.previous_target {
            if prev != target {
                self.enter_calibration("fps target changed");
            }
        }
        self.previous_target = Some(target);

        let sample = ControlSample {
            wanted_fps: target,
            actual_fps: fps,
            actual_tdp: power,
            reference_tdp,
        };

        match self.state {
            ControllerState::BiasCalibration => {
                match self
                    .strategy
                    .calibrate(&sample, self.setpoint, &mut self.curve)
                {
                    CalibrationStep::Seed(tdp) | CalibrationStep::Bias(tdp) => {
                        self.setpoint = Some(tdp)
                    }
                    CalibrationStep::Waiting => {}
                    CalibrationStep::Converged => {
                        info!("AutoTDP BiasCalibration -> PidControl");
                        self.state = ControllerState::PidControl;
                        self.scene.reset();
                    }
                }
            }
            ControllerState::PidControl => {
                if let Some(sp) = self.setpoint {
                    self.setpoint = Some(self.strategy.correct(&sample, sp));
                }
            }
            ControllerState::Idle => {}
        }

        match self.setpoint {
            Some(sp) => {
                let clamped = sp.clamp(self.min_tdp, self.max_tdp);
                self.setpoint = Some(clamped);
                debug!(
                    state = ?self.state,
                    fps,
                    power,
                    reference_tdp,
                    setpoint = clamped,
                    "AutoTDP tick"
                );
                ControlOutput::Setpoint(clamped)
            }
            None => ControlOutput::Hold,
        }
    }
}
