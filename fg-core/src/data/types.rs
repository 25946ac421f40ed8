//! Core data types for framegov
//!
//! Defines the primary data structures shared between telemetry, the controller
//! and the watchdog jobs.

use serde::{Deserialize, Serialize};

/// Kind of value a telemetry reading carries (wire enum 0..=8)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadingKind {
    None,
    Temp,
    Volt,
    Fan,
    Current,
    Power,
    Clock,
    Usage,
    Other,
}

impl ReadingKind {
    /// Decode the wire value; unknown values map to `Other`
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => ReadingKind::None,
            1 => ReadingKind::Temp,
            2 => ReadingKind::Volt,
            3 => ReadingKind::Fan,
            4 => ReadingKind::Current,
            5 => ReadingKind::Power,
            6 => ReadingKind::Clock,
            7 => ReadingKind::Usage,
            _ => ReadingKind::Other,
        }
    }
}

/// One telemetry reading, as published by the monitoring application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub kind: ReadingKind,
    /// Index of the owning group in the sensor section
    pub sensor_index: u32,
    pub sensor_id: u32,
    pub label_original: String,
    pub label_user: String,
    pub unit: String,
    pub value: f64,
    pub value_min: f64,
    pub value_max: f64,
    pub value_avg: f64,
}

/// One physical or logical sensor source and its readings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorGroup {
    pub sensor_id: u32,
    pub sensor_instance: u32,
    pub name_original: String,
    pub name_user: String,
    pub readings: Vec<SensorReading>,
}

impl SensorGroup {
    /// Exact, case-sensitive lookup of a reading by its original label
    pub fn reading(&self, label: &str) -> Option<&SensorReading> {
        self.readings.iter().find(|r| r.label_original == label)
    }
}

/// Performance curve breakpoint
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveNode {
    pub tdp_watts: f64,
    pub expected_fps: f64,
    /// Local ΔFPS/ΔTDP, derived from the neighbouring nodes
    #[serde(default)]
    pub process_gain: f64,
}

impl CurveNode {
    pub fn new(tdp_watts: f64, expected_fps: f64) -> Self {
        Self {
            tdp_watts,
            expected_fps,
            process_gain: 0.0,
        }
    }
}

/// Power rails the CPU limit job can reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PowerRail {
    Slow,
    Stapm,
    Fast,
    MsrSlow,
    MsrFast,
}

impl PowerRail {
    /// Rails with a stored request (the MSR pair is derived from Slow/Fast)
    pub const REQUESTED: [PowerRail; 3] = [PowerRail::Slow, PowerRail::Stapm, PowerRail::Fast];

    /// All rails with a read-back value
    pub const ALL: [PowerRail; 5] = [
        PowerRail::Slow,
        PowerRail::Stapm,
        PowerRail::Fast,
        PowerRail::MsrSlow,
        PowerRail::MsrFast,
    ];

    pub fn index(self) -> usize {
        match self {
            PowerRail::Slow => 0,
            PowerRail::Stapm => 1,
            PowerRail::Fast => 2,
            PowerRail::MsrSlow => 3,
            PowerRail::MsrFast => 4,
        }
    }
}

/// Who asked for a limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestOrigin {
    User,
    Profile,
    Controller,
}

/// A request to enforce a power limit on one rail
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TdpRequest {
    pub rail: PowerRail,
    pub watts: f64,
    pub origin: RequestOrigin,
}

/// Per-game profile as delivered by the profile collaborator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    /// Application the profile belongs to; selects the performance curve
    #[serde(default)]
    pub application: Option<String>,
    #[serde(default)]
    pub tdp_override: bool,
    /// Slow, Stapm, Fast
    #[serde(default)]
    pub tdp_value: Option<[f64; 3]>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_kind_from_raw() {
        assert_eq!(ReadingKind::from_raw(0), ReadingKind::None);
        assert_eq!(ReadingKind::from_raw(5), ReadingKind::Power);
        assert_eq!(ReadingKind::from_raw(8), ReadingKind::Other);
        assert_eq!(ReadingKind::from_raw(42), ReadingKind::Other);
    }

    #[test]
    fn test_group_lookup_is_exact() {
        let group = SensorGroup {
            name_original: "RTSS".into(),
            readings: vec![SensorReading {
                kind: ReadingKind::Other,
                sensor_index: 0,
                sensor_id: 7,
                label_original: "Framerate".into(),
                label_user: "FPS".into(),
                unit: "FPS".into(),
                value: 59.8,
                value_min: 30.0,
                value_max: 61.0,
                value_avg: 58.0,
            }],
            ..Default::default()
        };
        assert!(group.reading("Framerate").is_some());
        assert!(group.reading("framerate").is_none());
        assert!(group.reading("FPS").is_none());
    }

    #[test]
    fn test_rail_indices_are_dense() {
        for (i, rail) in PowerRail::ALL.iter().enumerate() {
            assert_eq!(rail.index(), i);
        }
    }
}
