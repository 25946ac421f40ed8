//! AutoTDP control engine
//!
//! Performance curve, bias estimation, signal filtering and the adaptive
//! controller state machine.

mod bias;
mod controller;
mod curve;
mod filter;
mod history;
mod strategy;

pub use bias::BiasEstimator;
pub use controller::{AdaptiveController, ControlInput, ControlOutput, ControllerState};
pub use curve::PerformanceCurve;
pub use filter::OneEuroFilter;
pub use history::{SceneChangeDetector, SetpointHistory};
pub use strategy::{BiasRatioStrategy, CalibrationStep, ControlSample, ControlStrategy};
