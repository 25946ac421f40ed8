//! Named controller signals extracted from the telemetry snapshot

use std::sync::atomic::{AtomicBool, Ordering};

use super::channel::TelemetryChannel;
use crate::constants::telemetry as names;
use crate::governor::PublishedValue;

/// Group names the signals are looked up in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalSources {
    pub overlay_group: String,
    pub cpu_group: String,
}

/// One extraction pass over a snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SignalSnapshot {
    pub framerate: Option<f64>,
    pub frame_time_ms: Option<f64>,
    pub package_power_watts: Option<f64>,
}

impl SignalSnapshot {
    pub fn extract(channel: &TelemetryChannel, sources: &SignalSources) -> Self {
        Self {
            framerate: channel.lookup(&sources.overlay_group, names::LABEL_FRAMERATE),
            frame_time_ms: channel.lookup(&sources.overlay_group, names::LABEL_FRAME_TIME),
            package_power_watts: channel.lookup(&sources.cpu_group, names::LABEL_PACKAGE_POWER),
        }
    }
}

/// Latest signals, written by the sensor job and read by everyone else
#[derive(Debug, Default)]
pub struct TelemetrySignals {
    pub framerate: PublishedValue,
    pub frame_time_ms: PublishedValue,
    pub package_power_watts: PublishedValue,
    connected: AtomicBool,
}

impl TelemetrySignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a fresh snapshot; a signal missing from it becomes absent
    pub fn publish(&self, snapshot: &SignalSnapshot) {
        for (cell, value) in [
            (&self.framerate, snapshot.framerate),
            (&self.frame_time_ms, snapshot.frame_time_ms),
            (&self.package_power_watts, snapshot.package_power_watts),
        ] {
            match value {
                Some(v) => cell.publish(v),
                None => cell.clear(),
            }
        }
    }

    /// Current values as a snapshot
    pub fn snapshot(&self) -> SignalSnapshot {
        SignalSnapshot {
            framerate: self.framerate.get(),
            frame_time_ms: self.frame_time_ms.get(),
            package_power_watts: self.package_power_watts.get(),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}
