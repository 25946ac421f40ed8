//! Framegov Core Library
//!
//! A frame-rate driven power limit governor for handheld and mobile x86 systems.
//!
//! # Features
//!
//! - **Telemetry**: Reads frame rate and package power from a monitoring
//!   application's shared memory region
//! - **Performance Curves**: Per-application TDP/FPS tables that recalibrate
//!   themselves against live observations
//! - **AutoTDP**: Bias calibration followed by proportional-ratio correction
//! - **Watchdogs**: Non-blocking jobs that keep power limits, GPU clock and the
//!   power scheme in sync with what was requested
//! - **Configuration**: Persistent settings and per-application curves
//!
//! # Module Structure
//!
//! - `telemetry/` - Shared memory layout, channel and named signals
//! - `engine/` - Curve, bias estimator, filters and the adaptive controller
//! - `governor/` - Shared context, lock domains and the watchdog tick functions
//! - `hw/` - Processor and power scheme collaborators
//! - `data/` - Data types, configuration, validation, persistence
//!
//! # Example
//!
//! ```no_run
//! use fg_core::{data::CurveNode, PerformanceCurve};
//!
//! let curve = PerformanceCurve::new(vec![
//!     CurveNode::new(5.0, 15.0),
//!     CurveNode::new(15.0, 74.0),
//!     CurveNode::new(25.0, 84.0),
//! ])
//! .unwrap();
//! let watts = curve.required_tdp(60.0);
//! ```

// Grouped modules
pub mod data;
pub mod engine;
pub mod governor;
pub mod hw;
pub mod telemetry;

// Standalone modules
pub mod constants;
pub mod error;
pub mod system;

// Re-export primary types from data/
pub use data::{
    CurveNode, PowerRail, Profile, ReadingKind, RequestOrigin, SensorGroup, SensorReading,
    TdpRequest,
};

// Re-export config and persistence from data/
pub use data::{
    get_curves_path, get_settings_path, load_curves, load_settings, save_curves, CurveStore,
    GovernorSettings, PersistedCurve,
};

// Re-export error types
pub use error::{FramegovError, Result};

// Re-export engine types
pub use engine::{
    AdaptiveController, BiasEstimator, ControlStrategy, ControllerState, PerformanceCurve,
};

// Re-export governor types
pub use governor::{run_tick, GovernorContext, Hardware, JobKind, TickOutcome};

// Re-export hardware collaborators
pub use hw::{
    DryRunProcessor, HardwareReadback, PlatformProfileControl, PowerScheme, PowerSchemeControl,
    Processor, ProcessorKind,
};

// Re-export telemetry types
pub use telemetry::{ChannelEvent, ChannelStatus, TelemetryChannel};
