//! OS power scheme control
//!
//! The governor knows three overlay schemes identified by fixed GUIDs. On
//! Linux they are carried by the ACPI platform profile:
//!
//! | Scheme             | platform_profile |
//! |--------------------|------------------|
//! | Better Battery     | `low-power`      |
//! | Better Performance | `balanced`       |
//! | Best Performance   | `performance`    |

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::constants::paths;
use crate::error::{FramegovError, Result};

/// Overlay power scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerScheme {
    BetterBattery,
    BetterPerformance,
    BestPerformance,
}

impl PowerScheme {
    /// Request order used by [`PowerScheme::from_index`]
    pub const ALL: [PowerScheme; 3] = [
        PowerScheme::BetterBattery,
        PowerScheme::BetterPerformance,
        PowerScheme::BestPerformance,
    ];

    pub fn guid(self) -> Uuid {
        match self {
            PowerScheme::BetterBattery => Uuid::from_u128(0x961cc777_2547_4f9d_8174_7d86181b8a7a),
            PowerScheme::BetterPerformance => Uuid::nil(),
            PowerScheme::BestPerformance => Uuid::from_u128(0xded574b5_45a0_4f42_8737_46345c09c238),
        }
    }

    pub fn from_guid(guid: &Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.guid() == *guid)
    }

    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }

    pub fn platform_profile(self) -> &'static str {
        match self {
            PowerScheme::BetterBattery => "low-power",
            PowerScheme::BetterPerformance => "balanced",
            PowerScheme::BestPerformance => "performance",
        }
    }

    /// Map a platform profile name; vendor aliases fold onto the nearest scheme
    pub fn from_platform_profile(profile: &str) -> Option<Self> {
        match profile.trim() {
            "low-power" | "quiet" | "cool" => Some(PowerScheme::BetterBattery),
            "balanced" | "balanced-performance" => Some(PowerScheme::BetterPerformance),
            "performance" => Some(PowerScheme::BestPerformance),
            _ => None,
        }
    }
}

/// Get/set the effective overlay scheme
pub trait PowerSchemeControl: Send + Sync {
    fn active(&self) -> Result<PowerScheme>;
    fn set_active(&self, scheme: PowerScheme) -> Result<()>;
}

/// Platform profile backed scheme control
#[derive(Debug, Clone)]
pub struct PlatformProfileControl {
    path: PathBuf,
}

impl PlatformProfileControl {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The ACPI platform profile of this machine, if the firmware exposes one
    pub fn system() -> Option<Self> {
        let path = Path::new(paths::PLATFORM_PROFILE);
        path.exists().then(|| Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PowerSchemeControl for PlatformProfileControl {
    fn active(&self) -> Result<PowerScheme> {
        let content = fs::read_to_string(&self.path).map_err(|e| FramegovError::FileRead {
            path: self.path.clone(),
            source: e,
        })?;
        PowerScheme::from_platform_profile(&content).ok_or_else(|| {
            FramegovError::PowerScheme(format!("Unknown platform profile '{}'", content.trim()))
        })
    }

    fn set_active(&self, scheme: PowerScheme) -> Result<()> {
        debug!("Writing platform profile {}", scheme.platform_profile());
        fs::write(&self.path, scheme.platform_profile()).map_err(|e| FramegovError::FileWrite {
            path: self.path.clone(),
            source: e,
        })
    }
}

/// Scheme control that only remembers the last value
///
/// Stands in when the firmware has no platform profile.
#[derive(Debug)]
pub struct MemoryPowerScheme {
    active: Mutex<PowerScheme>,
}

impl MemoryPowerScheme {
    pub fn new(initial: PowerScheme) -> Self {
        Self {
            active: Mutex::new(initial),
        }
    }
}

impl Default for MemoryPowerScheme {
    fn default() -> Self {
        Self::new(PowerScheme::BetterPerformance)
    }
}

impl PowerSchemeControl for MemoryPowerScheme {
    fn active(&self) -> Result<PowerScheme> {
        Ok(*self.active.lock())
    }

    fn set_active(&self, scheme: PowerScheme) -> Result<()> {
        *self.active.lock() = scheme;
        Ok(())
    }
}
