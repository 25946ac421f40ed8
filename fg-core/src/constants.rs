//! Constants and configuration values for framegov
//!
//! Centralizes all magic numbers, paths, and configuration defaults.
//! Never use magic numbers in other files - add them here first.

/// System paths
pub mod paths {
    use std::path::PathBuf;

    /// Directory holding POSIX shared memory objects
    pub const SHM_DIR: &str = "/dev/shm";

    /// ACPI platform profile (Linux equivalent of the overlay power scheme)
    pub const PLATFORM_PROFILE: &str = "/sys/firmware/acpi/platform_profile";

    /// Kernel lockdown policy; a selected `integrity` or `confidentiality` mode forbids MSR access
    pub const KERNEL_LOCKDOWN: &str = "/sys/kernel/security/lockdown";

    /// CPU information
    pub const CPUINFO: &str = "/proc/cpuinfo";

    /// Settings file name
    pub const SETTINGS_FILE: &str = "settings.json";

    /// Per-application performance curve store
    pub const CURVES_FILE: &str = "curves.json";

    /// User configuration directory (`$XDG_CONFIG_HOME/framegov`, falling back to `~/.config/framegov`)
    pub fn user_config_dir() -> Option<PathBuf> {
        let base = if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            Some(PathBuf::from(xdg))
        } else {
            dirs::config_dir()
        };
        base.map(|p| p.join("framegov"))
    }
}

/// Shared-memory telemetry layout published by the monitoring application
pub mod telemetry {
    /// Well-known shared memory object name
    pub const SHARED_MEMORY_NAME: &str = "HWiNFO_SENS_SM2";

    /// Fixed width of sensor and label strings
    pub const STRING_LEN: usize = 128;

    /// Fixed width of unit strings
    pub const UNIT_STRING_LEN: usize = 16;

    /// Overlay tool group name carrying frame statistics
    pub const OVERLAY_GROUP: &str = "RTSS";

    /// Frame rate label inside the overlay group
    pub const LABEL_FRAMERATE: &str = "Framerate";

    /// Frame time label inside the overlay group
    pub const LABEL_FRAME_TIME: &str = "Frame Time";

    /// Package power label inside the CPU group
    pub const LABEL_PACKAGE_POWER: &str = "CPU Package Power";

    /// Format the CPU package group name for a given model string
    pub fn cpu_group_name(model: &str) -> String {
        format!("CPU [#0]: {}: Enhanced", model)
    }
}

/// Watchdog job cadence
pub mod timing {
    /// Power scheme sync interval
    pub const POWER_SCHEME_INTERVAL_MS: u64 = 1000;

    /// CPU limit / GPU clock interval
    pub const LIMIT_INTERVAL_MS: u64 = 1000;

    /// CPU limit interval on Intel (MSR access is expensive)
    pub const LIMIT_INTERVAL_INTEL_MS: u64 = 5000;

    /// CPU limit interval while the read-back is degraded
    pub const LIMIT_INTERVAL_DEGRADED_MS: u64 = 5000;

    /// Telemetry polling interval
    pub const SENSOR_INTERVAL_MS: u64 = 100;

    /// AutoTDP controller tick interval
    pub const AUTO_TDP_INTERVAL_MS: u64 = 100;

    /// Interval between two shared memory connection checks
    pub const CONNECTION_CHECK_INTERVAL_MS: u64 = 3000;

    /// Lower bound for any configured job interval
    pub const MIN_INTERVAL_MS: u64 = 10;
}

/// Power limit bounds and read-back sanity
pub mod tdp {
    /// Lowest TDP the controller will ever request
    pub const DEFAULT_MIN_WATTS: f64 = 5.0;

    /// Highest TDP the controller will ever request
    pub const DEFAULT_MAX_WATTS: f64 = 25.0;

    /// Default sustained limit when nothing is configured
    pub const DEFAULT_SUSTAINED_WATTS: f64 = 15.0;

    /// Default boost limit when nothing is configured
    pub const DEFAULT_BOOST_WATTS: f64 = 20.0;

    /// Read-back values outside this range mean the processor driver is degraded
    pub const READBACK_MAX_WATTS: f64 = 255.0;

    /// Read-back and requested limits closer than this are considered applied
    pub const MATCH_TOLERANCE_WATTS: f64 = 0.5;

    /// AMD reduces the sustained limit by this factor under the battery scheme
    pub const AMD_BATTERY_SCHEME_FACTOR: f64 = 0.9;
}

/// GPU clock read-back matching
pub mod gpu {
    /// Read-back and requested clocks closer than this are considered applied
    pub const MATCH_TOLERANCE_MHZ: f64 = 1.0;
}

/// AutoTDP controller tuning
pub mod control {
    /// Default frame rate target
    pub const DEFAULT_FPS_TARGET: f64 = 60.0;

    /// Bias calibration attempts before falling through to ratio correction
    pub const BIAS_ATTEMPT_BUDGET: u32 = 3;

    /// Frame rate error (percent of target) tolerated without another bias attempt
    pub const BIAS_TOLERANCE_PERCENT: f64 = 10.0;

    /// Measured delay between a TDP change and the resulting frame rate change
    pub const FPS_RESPONSE_LATENCY_MS: u64 = 1300;

    /// Extra margin for the frame rate filter to settle
    pub const FILTER_SETTLE_MARGIN_MS: u64 = 400;

    /// Negative error clamp for one correction step (overshooting downwards is unsafe)
    pub const ERROR_CLAMP_LOW: f64 = -5.0;

    /// Positive error clamp for one correction step
    pub const ERROR_CLAMP_HIGH: f64 = 15.0;

    /// Realistic frame rate range used by the ratio corrector
    pub const FPS_SANE_MIN: f64 = 1.0;
    pub const FPS_SANE_MAX: f64 = 500.0;

    /// Frame rates fed into bias estimation are clamped to this range
    pub const BIAS_FPS_MIN: f64 = 20.0;
    pub const BIAS_FPS_MAX: f64 = 90.0;

    /// Curve error (percent) that counts as a candidate scene change
    pub const SCENE_CHANGE_ERROR_PERCENT: f64 = 25.0;

    /// How long the curve error has to persist before a scene change fires
    pub const SCENE_CHANGE_DURATION_MS: u64 = 3000;

    /// Setpoint history depth (one slot per AutoTDP tick)
    pub const HISTORY_LEN: usize = 20;

    /// Slot closest to the FPS response latency at 100 ms ticks
    pub const HISTORY_LAGGED_SLOT: usize = 12;

    /// Slot representing the most recent settled setpoint
    pub const HISTORY_RECENT_SLOT: usize = 2;

    /// Blend between the lagged and recent slot for the valid reference TDP
    pub const HISTORY_BLEND: f64 = 0.68;
}

/// Performance curve defaults
pub mod curve {
    /// Fraction of the observed/predicted error applied per rescale
    pub const DEFAULT_DAMPING: f64 = 0.96;

    /// Accepted damping range
    pub const MIN_DAMPING: f64 = 0.0;
    pub const MAX_DAMPING: f64 = 0.99;

    /// Minimum breakpoints for interpolation
    pub const MIN_NODES: usize = 2;

    /// Maximum breakpoints accepted from a curve file
    pub const MAX_NODES: usize = 64;

    /// Avoid division by zero on degenerate segments
    pub const FLOAT_EPSILON: f64 = 1e-9;
}

/// One-Euro filter parameters
pub mod filter {
    pub const FPS_MIN_CUTOFF: f64 = 0.15;
    pub const FPS_BETA: f64 = 0.1;
    pub const TDP_MIN_CUTOFF: f64 = 0.25;
    pub const TDP_BETA: f64 = 0.2;

    /// Cutoff for the derivative estimate
    pub const DERIVATIVE_CUTOFF: f64 = 1.0;
}

/// Size limits for files read from disk
pub mod limits {
    /// Maximum settings / curve file size
    pub const MAX_CONFIG_SIZE: u64 = 1024 * 1024;

    /// Maximum application name length in the curve store
    pub const MAX_APP_NAME_LEN: usize = 128;
}

/// Built-in baseline performance curve (TDP watts, expected FPS)
pub mod default_curve {
    use crate::data::CurveNode;

    /// A typical handheld TDP/FPS relationship: steep up to ~12 W, saturating above ~20 W
    pub fn baseline() -> Vec<CurveNode> {
        [
            (5.0, 15.0),
            (6.0, 18.0),
            (7.0, 25.0),
            (8.0, 36.0),
            (9.0, 46.0),
            (10.0, 54.0),
            (11.0, 59.0),
            (12.0, 64.0),
            (13.0, 68.0),
            (14.0, 71.0),
            (15.0, 74.0),
            (16.0, 74.5),
            (17.0, 75.0),
            (18.0, 75.5),
            (19.0, 76.0),
            (20.0, 80.0),
            (21.0, 80.5),
            (22.0, 81.0),
            (23.0, 81.5),
            (24.0, 82.0),
            (25.0, 84.0),
        ]
        .iter()
        .map(|&(tdp, fps)| CurveNode::new(tdp, fps))
        .collect()
    }
}
