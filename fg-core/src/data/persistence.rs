//! JSON persistence for per-application performance curves
//!
//! Each running game gets its own TDP/FPS table. Curves that were calibrated
//! during a session can be written back so the next launch starts closer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::constants::{default_curve, paths};
use crate::data::validation::{validate_app_name, validate_curve_nodes, validate_file_size};
use crate::data::CurveNode;
use crate::error::{FramegovError, Result};

/// Persisted curve for one application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedCurve {
    pub nodes: Vec<CurveNode>,
    #[serde(default)]
    pub updated_at: u64,
}

/// Collection of all persisted curves, keyed by application name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveStore {
    pub version: u32,
    #[serde(default)]
    pub curves: BTreeMap<String, PersistedCurve>,
}

impl Default for CurveStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CurveStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            version: 1,
            curves: BTreeMap::new(),
        }
    }

    /// Add or replace the curve for an application
    pub fn upsert(&mut self, application: &str, nodes: Vec<CurveNode>) -> Result<()> {
        validate_app_name(application)?;
        validate_curve_nodes(&nodes)?;
        self.curves.insert(
            application.to_string(),
            PersistedCurve {
                nodes,
                updated_at: current_timestamp(),
            },
        );
        Ok(())
    }

    /// Remove an application's curve
    pub fn remove(&mut self, application: &str) -> Option<PersistedCurve> {
        self.curves.remove(application)
    }

    /// Nodes stored for an application, if any
    pub fn get(&self, application: &str) -> Option<&[CurveNode]> {
        self.curves.get(application).map(|c| c.nodes.as_slice())
    }

    /// Nodes for an application, or the built-in baseline
    pub fn nodes_for(&self, application: Option<&str>) -> Vec<CurveNode> {
        application
            .and_then(|app| self.get(app))
            .map(|nodes| nodes.to_vec())
            .unwrap_or_else(default_curve::baseline)
    }

    pub fn len(&self) -> usize {
        self.curves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.curves.is_empty()
    }
}

/// Get the path to the curves JSON file
pub fn get_curves_path() -> PathBuf {
    paths::user_config_dir()
        .unwrap_or_else(|| PathBuf::from(".").join("framegov"))
        .join(paths::CURVES_FILE)
}

/// Load curves from a file; a missing file yields an empty store
///
/// Entries that fail validation are dropped with a warning instead of failing
/// the whole store.
pub fn load_curves_from(path: &Path) -> Result<CurveStore> {
    if !path.exists() {
        debug!("No curves file found at {:?}, returning empty store", path);
        return Ok(CurveStore::new());
    }

    validate_file_size(path)?;
    let contents = fs::read_to_string(path).map_err(|e| FramegovError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut store: CurveStore = serde_json::from_str(&contents)?;

    store.curves.retain(|app, curve| {
        match validate_app_name(app).and_then(|_| validate_curve_nodes(&curve.nodes)) {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropping invalid curve for '{}': {}", app, e);
                false
            }
        }
    });

    info!("Loaded {} curves from {:?}", store.len(), path);
    Ok(store)
}

/// Load curves from the default location
pub fn load_curves() -> Result<CurveStore> {
    load_curves_from(&get_curves_path())
}

/// Save curves atomically (temp file then rename)
pub fn save_curves_to(path: &Path, store: &CurveStore) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(store)?;
    let temp_path = path.with_extension("json.tmp");

    let mut file = fs::File::create(&temp_path).map_err(|e| FramegovError::FileWrite {
        path: temp_path.clone(),
        source: e,
    })?;
    file.write_all(json.as_bytes())
        .map_err(|e| FramegovError::FileWrite {
            path: temp_path.clone(),
            source: e,
        })?;
    file.sync_all().map_err(|e| FramegovError::FileWrite {
        path: temp_path.clone(),
        source: e,
    })?;

    fs::rename(&temp_path, path).map_err(|e| FramegovError::FileWrite {
        path: path.to_path_buf(),
        source: e,
    })?;

    debug!("Saved {} curves to {:?}", store.len(), path);
    Ok(())
}

/// Save curves to the default location
pub fn save_curves(store: &CurveStore) -> Result<()> {
    save_curves_to(&get_curves_path(), store)
}

fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
