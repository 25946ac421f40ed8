//! Data types, configuration, and validation modules
//!
//! Contains all core data structures and configuration management.

mod config;
mod persistence;
mod types;
mod validation;

pub use config::{
    get_settings_path, load_settings, load_settings_from, save_settings_to, ControlSettings,
    GovernorSettings, IntervalSettings, TelemetrySettings,
};
pub use persistence::{
    get_curves_path, load_curves, load_curves_from, save_curves, save_curves_to, CurveStore,
    PersistedCurve,
};
pub use types::{
    CurveNode, PowerRail, Profile, ReadingKind, RequestOrigin, SensorGroup, SensorReading,
    TdpRequest,
};
pub use validation::{validate_app_name, validate_curve_nodes, validate_file_size};
