//! Governor settings
//!
//! Persistent settings stored as JSON in ~/.config/framegov/settings.json.
//! Every field carries a serde default so partial or legacy files still load.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::constants::{control, curve, filter, paths, tdp, telemetry, timing};
use crate::data::validation::validate_file_size;
use crate::error::{FramegovError, Result};

/// Top-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorSettings {
    /// Sustained (slow/stapm) TDP target in watts
    #[serde(default = "default_sustained")]
    pub tdp_sustained_watts: f64,

    /// Boost (fast) TDP target in watts
    #[serde(default = "default_boost")]
    pub tdp_boost_watts: f64,

    /// GPU clock target in MHz (0 = leave the GPU alone)
    #[serde(default)]
    pub gpu_clock_mhz: f64,

    /// AutoTDP frame rate target
    #[serde(default = "default_fps_target")]
    pub auto_tdp_fps_target: f64,

    /// Keep the TDP watchdog running regardless of profiles
    #[serde(default)]
    pub tdp_watchdog_enabled: bool,

    #[serde(default)]
    pub control: ControlSettings,

    #[serde(default)]
    pub intervals: IntervalSettings,

    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

/// AutoTDP controller tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlSettings {
    #[serde(default = "default_min_tdp")]
    pub min_tdp_watts: f64,
    #[serde(default = "default_max_tdp")]
    pub max_tdp_watts: f64,
    #[serde(default = "default_attempt_budget")]
    pub bias_attempt_budget: u32,
    #[serde(default = "default_tolerance")]
    pub bias_tolerance_percent: f64,
    #[serde(default = "default_damping")]
    pub curve_damping: f64,
    #[serde(default = "default_latency")]
    pub fps_response_latency_ms: u64,
    #[serde(default = "default_settle_margin")]
    pub filter_settle_margin_ms: u64,
    #[serde(default = "default_fps_cutoff")]
    pub fps_filter_min_cutoff: f64,
    #[serde(default = "default_fps_beta")]
    pub fps_filter_beta: f64,
    #[serde(default = "default_tdp_cutoff")]
    pub tdp_filter_min_cutoff: f64,
    #[serde(default = "default_tdp_beta")]
    pub tdp_filter_beta: f64,
}

/// Watchdog job intervals in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalSettings {
    #[serde(default = "default_power_scheme_interval")]
    pub power_scheme_ms: u64,
    #[serde(default = "default_limit_interval")]
    pub limit_ms: u64,
    #[serde(default = "default_sensor_interval")]
    pub sensor_ms: u64,
    #[serde(default = "default_auto_tdp_interval")]
    pub auto_tdp_ms: u64,
    #[serde(default = "default_connection_interval")]
    pub connection_check_ms: u64,
}

/// Where telemetry comes from and which groups carry the controller signals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySettings {
    #[serde(default = "default_shm_name")]
    pub shared_memory_name: String,
    #[serde(default = "default_shm_dir")]
    pub shm_dir: PathBuf,
    #[serde(default = "default_overlay_group")]
    pub overlay_group: String,
    /// Overrides the CPU group name derived from /proc/cpuinfo
    #[serde(default)]
    pub cpu_sensor_group: Option<String>,
}

fn default_sustained() -> f64 {
    tdp::DEFAULT_SUSTAINED_WATTS
}
fn default_boost() -> f64 {
    tdp::DEFAULT_BOOST_WATTS
}
fn default_fps_target() -> f64 {
    control::DEFAULT_FPS_TARGET
}
fn default_min_tdp() -> f64 {
    tdp::DEFAULT_MIN_WATTS
}
fn default_max_tdp() -> f64 {
    tdp::DEFAULT_MAX_WATTS
}
fn default_attempt_budget() -> u32 {
    control::BIAS_ATTEMPT_BUDGET
}
fn default_tolerance() -> f64 {
    control::BIAS_TOLERANCE_PERCENT
}
fn default_damping() -> f64 {
    curve::DEFAULT_DAMPING
}
fn default_latency() -> u64 {
    control::FPS_RESPONSE_LATENCY_MS
}
fn default_settle_margin() -> u64 {
    control::FILTER_SETTLE_MARGIN_MS
}
fn default_fps_cutoff() -> f64 {
    filter::FPS_MIN_CUTOFF
}
fn default_fps_beta() -> f64 {
    filter::FPS_BETA
}
fn default_tdp_cutoff() -> f64 {
    filter::TDP_MIN_CUTOFF
}
fn default_tdp_beta() -> f64 {
    filter::TDP_BETA
}
fn default_power_scheme_interval() -> u64 {
    timing::POWER_SCHEME_INTERVAL_MS
}
fn default_limit_interval() -> u64 {
    timing::LIMIT_INTERVAL_MS
}
fn default_sensor_interval() -> u64 {
    timing::SENSOR_INTERVAL_MS
}
fn default_auto_tdp_interval() -> u64 {
    timing::AUTO_TDP_INTERVAL_MS
}
fn default_connection_interval() -> u64 {
    timing::CONNECTION_CHECK_INTERVAL_MS
}
fn default_shm_name() -> String {
    telemetry::SHARED_MEMORY_NAME.to_string()
}
fn default_shm_dir() -> PathBuf {
    PathBuf::from(paths::SHM_DIR)
}
fn default_overlay_group() -> String {
    telemetry::OVERLAY_GROUP.to_string()
}

impl Default for GovernorSettings {
    fn default() -> Self {
        Self {
            tdp_sustained_watts: default_sustained(),
            tdp_boost_watts: default_boost(),
            gpu_clock_mhz: 0.0,
            auto_tdp_fps_target: default_fps_target(),
            tdp_watchdog_enabled: false,
            control: ControlSettings::default(),
            intervals: IntervalSettings::default(),
            telemetry: TelemetrySettings::default(),
        }
    }
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            min_tdp_watts: default_min_tdp(),
            max_tdp_watts: default_max_tdp(),
            bias_attempt_budget: default_attempt_budget(),
            bias_tolerance_percent: default_tolerance(),
            curve_damping: default_damping(),
            fps_response_latency_ms: default_latency(),
            filter_settle_margin_ms: default_settle_margin(),
            fps_filter_min_cutoff: default_fps_cutoff(),
            fps_filter_beta: default_fps_beta(),
            tdp_filter_min_cutoff: default_tdp_cutoff(),
            tdp_filter_beta: default_tdp_beta(),
        }
    }
}

impl Default for IntervalSettings {
    fn default() -> Self {
        Self {
            power_scheme_ms: default_power_scheme_interval(),
            limit_ms: default_limit_interval(),
            sensor_ms: default_sensor_interval(),
            auto_tdp_ms: default_auto_tdp_interval(),
            connection_check_ms: default_connection_interval(),
        }
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            shared_memory_name: default_shm_name(),
            shm_dir: default_shm_dir(),
            overlay_group: default_overlay_group(),
            cpu_sensor_group: None,
        }
    }
}

impl GovernorSettings {
    /// Clamp tuning into usable ranges; reject settings that cannot work at all
    pub fn validate(mut self) -> Result<Self> {
        let c = &mut self.control;
        if !c.min_tdp_watts.is_finite() || !c.max_tdp_watts.is_finite() {
            return Err(FramegovError::invalid_config("control.min_tdp_watts", "not finite"));
        }
        if c.min_tdp_watts <= 0.0 || c.min_tdp_watts >= c.max_tdp_watts {
            return Err(FramegovError::invalid_config(
                "control.min_tdp_watts",
                format!(
                    "must be positive and below max ({} >= {})",
                    c.min_tdp_watts, c.max_tdp_watts
                ),
            ));
        }
        c.curve_damping = c.curve_damping.clamp(curve::MIN_DAMPING, curve::MAX_DAMPING);
        c.bias_tolerance_percent = c.bias_tolerance_percent.max(0.0);

        let i = &mut self.intervals;
        for ms in [
            &mut i.power_scheme_ms,
            &mut i.limit_ms,
            &mut i.sensor_ms,
            &mut i.auto_tdp_ms,
            &mut i.connection_check_ms,
        ] {
            *ms = (*ms).max(timing::MIN_INTERVAL_MS);
        }

        if self.auto_tdp_fps_target <= 0.0 || !self.auto_tdp_fps_target.is_finite() {
            warn!(
                "Invalid AutoTDP fps target {} - using default {}",
                self.auto_tdp_fps_target,
                control::DEFAULT_FPS_TARGET
            );
            self.auto_tdp_fps_target = control::DEFAULT_FPS_TARGET;
        }

        Ok(self)
    }

    /// Cooldown after a bias attempt: one apply interval plus FPS latency plus filter margin
    pub fn bias_cooldown_ms(&self) -> u64 {
        self.intervals.limit_ms
            + self.control.fps_response_latency_ms
            + self.control.filter_settle_margin_ms
    }
}

/// Get the path to the settings JSON file
pub fn get_settings_path() -> PathBuf {
    paths::user_config_dir()
        .unwrap_or_else(|| PathBuf::from(".").join("framegov"))
        .join(paths::SETTINGS_FILE)
}

/// Load settings from the default location
pub fn load_settings() -> Result<GovernorSettings> {
    load_settings_from(&get_settings_path())
}

/// Load settings from a file; a missing file yields defaults
pub fn load_settings_from(path: &Path) -> Result<GovernorSettings> {
    if !path.exists() {
        debug!("No settings file at {:?}, using defaults", path);
        return GovernorSettings::default().validate();
    }

    validate_file_size(path)?;
    let contents = fs::read_to_string(path).map_err(|e| FramegovError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    let settings: GovernorSettings = serde_json::from_str(&contents)?;
    info!("Loaded settings from {:?}", path);
    settings.validate()
}

/// Save settings atomically (temp file then rename)
pub fn save_settings_to(path: &Path, settings: &GovernorSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, json).map_err(|e| FramegovError::FileWrite {
        path: temp_path.clone(),
        source: e,
    })?;
    fs::rename(&temp_path, path).map_err(|e| FramegovError::FileWrite {
        path: path.to_path_buf(),
        source: e,
    })?;
    debug!("Saved settings to {:?}", path);
    Ok(())
}
