//! Unified error handling for framegov
//!
//! This crate provides a single error type used across all framegov components.
//! It uses thiserror for ergonomic error definitions with proper Display and Error trait impls.

use std::io;
use std::path::PathBuf;

/// Result type alias using FramegovError
pub type Result<T> = std::result::Result<T, FramegovError>;

/// Unified error type for all framegov operations
#[derive(thiserror::Error, Debug)]
pub enum FramegovError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Telemetry Errors
    // ============================================================================
    /// The monitoring application is not running or its access window expired.
    #[error("Telemetry source unavailable: {0}")]
    TelemetryUnavailable(String),

    /// A read against an attached region failed mid-scan.
    #[error("Telemetry source disconnected: {0}")]
    TelemetryDisconnected(String),

    #[error("Invalid telemetry layout: {0}")]
    TelemetryLayout(String),

    /// A lookup failed to bracket its query value.
    #[error("Telemetry value out of range: {0}")]
    TelemetryParseOutOfRange(String),

    // ============================================================================
    // Hardware Access Errors
    // ============================================================================
    /// Actuation suppressed because the processor state is not ready yet.
    #[error("Hardware write skipped: {0}")]
    HardwareWriteSkipped(String),

    /// Low-level register access is forbidden by the platform security policy.
    #[error("Initialization blocked: {0}")]
    InitializationBlocked(String),

    #[error("Hardware write failed for {target}: {reason}")]
    HardwareWrite {
        target: String,
        reason: String,
    },

    #[error("Power scheme error: {0}")]
    PowerScheme(String),

    // ============================================================================
    // Configuration and Validation Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    #[error("Curve validation failed: {0}")]
    InvalidCurve(String),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),
}

impl FramegovError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid config error for a named field
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a curve validation error
    pub fn invalid_curve(msg: impl Into<String>) -> Self {
        Self::InvalidCurve(msg.into())
    }

    /// Create a disconnected error from a string
    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::TelemetryDisconnected(msg.into())
    }

    /// Create a hardware write error
    pub fn hardware_write(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::HardwareWrite {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// True when the error means the telemetry source went away and a reconnect is needed
    pub fn is_telemetry_loss(&self) -> bool {
        matches!(
            self,
            Self::TelemetryUnavailable(_) | Self::TelemetryDisconnected(_)
        )
    }
}

// Allow converting from String to FramegovError
impl From<String> for FramegovError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

// Allow converting from &str to FramegovError
impl From<&str> for FramegovError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_loss_classification() {
        assert!(FramegovError::TelemetryUnavailable("gone".into()).is_telemetry_loss());
        assert!(FramegovError::disconnected("mid-scan").is_telemetry_loss());
        assert!(!FramegovError::HardwareWriteSkipped("msr".into()).is_telemetry_loss());
    }

    #[test]
    fn test_display_includes_context() {
        let err = FramegovError::invalid_config("min_tdp_watts", "must be below max");
        assert_eq!(
            err.to_string(),
            "Invalid configuration value for min_tdp_watts: must be below max"
        );
    }
}
