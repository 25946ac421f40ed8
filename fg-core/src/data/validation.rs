//! Input validation for framegov
//!
//! Curve tables, application names and files read from disk are validated here
//! before anything else touches them.

use std::path::Path;

use crate::constants::{curve, limits};
use crate::data::CurveNode;
use crate::error::{FramegovError, Result};

/// Validates a breakpoint table for interpolation
///
/// Requires at least two nodes, finite values, strictly increasing TDP and
/// positive expected frame rates.
pub fn validate_curve_nodes(nodes: &[CurveNode]) -> Result<()> {
    if nodes.len() < curve::MIN_NODES {
        return Err(FramegovError::invalid_curve(format!(
            "curve needs at least {} nodes, got {}",
            curve::MIN_NODES,
            nodes.len()
        )));
    }
    if nodes.len() > curve::MAX_NODES {
        return Err(FramegovError::invalid_curve(format!(
            "curve has {} nodes, max {}",
            nodes.len(),
            curve::MAX_NODES
        )));
    }

    for (i, node) in nodes.iter().enumerate() {
        if !node.tdp_watts.is_finite() || !node.expected_fps.is_finite() {
            return Err(FramegovError::invalid_curve(format!(
                "node {} is not finite",
                i
            )));
        }
        if node.expected_fps <= 0.0 {
            return Err(FramegovError::invalid_curve(format!(
                "node {} has non-positive fps {}",
                i, node.expected_fps
            )));
        }
    }

    for (i, pair) in nodes.windows(2).enumerate() {
        if pair[1].tdp_watts <= pair[0].tdp_watts {
            return Err(FramegovError::invalid_curve(format!(
                "tdp must be strictly increasing: node {} ({} W) >= node {} ({} W)",
                i,
                pair[0].tdp_watts,
                i + 1,
                pair[1].tdp_watts
            )));
        }
    }

    Ok(())
}

/// Validates an application name used as a curve store key
pub fn validate_app_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(FramegovError::invalid_config("application", "name is empty"));
    }
    if name.len() > limits::MAX_APP_NAME_LEN {
        return Err(FramegovError::invalid_config(
            "application",
            format!("name longer than {} bytes", limits::MAX_APP_NAME_LEN),
        ));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(FramegovError::invalid_config(
            "application",
            "name contains control characters",
        ));
    }
    Ok(())
}

/// Rejects configuration files too large to be legitimate
pub fn validate_file_size(path: &Path) -> Result<()> {
    let meta = std::fs::metadata(path).map_err(|e| FramegovError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    if meta.len() > limits::MAX_CONFIG_SIZE {
        return Err(FramegovError::config(format!(
            "{:?} is {} bytes, max {}",
            path,
            meta.len(),
            limits::MAX_CONFIG_SIZE
        )));
    }
    Ok(())
}
