//! Watchdog job bookkeeping
//!
//! A job is a flag set plus an interval; the scheduler owns the timers and
//! reads these on every tick. Stopping a limit job is a request: the job
//! halts itself once the hardware has converged.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::{debug, info};

use crate::constants::timing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    PowerScheme,
    CpuLimit,
    GpuClock,
    TelemetrySensor,
    AutoTdp,
}

impl JobKind {
    pub const ALL: [JobKind; 5] = [
        JobKind::PowerScheme,
        JobKind::CpuLimit,
        JobKind::GpuClock,
        JobKind::TelemetrySensor,
        JobKind::AutoTdp,
    ];

    pub fn index(self) -> usize {
        match self {
            JobKind::PowerScheme => 0,
            JobKind::CpuLimit => 1,
            JobKind::GpuClock => 2,
            JobKind::TelemetrySensor => 3,
            JobKind::AutoTdp => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            JobKind::PowerScheme => "power-scheme",
            JobKind::CpuLimit => "cpu-limit",
            JobKind::GpuClock => "gpu-clock",
            JobKind::TelemetrySensor => "telemetry-sensor",
            JobKind::AutoTdp => "auto-tdp",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a tick did nothing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The job is not started
    NotRunning,
    /// The previous tick still holds the domain lock
    DomainBusy,
    /// No processor driver, or the driver is not initialized
    ProcessorUnavailable,
    /// Read-back values are missing; nothing is written this tick
    NotReady(String),
    /// Telemetry is not connected
    Disconnected,
}

/// Result of one job tick; errors never leave a tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Work done (writes may have been issued)
    Completed,
    /// Hardware already matches the request
    Converged,
    Skipped(SkipReason),
    /// The job halted itself
    Stopped,
    Failed(String),
}

/// Runtime state of one watchdog job
#[derive(Debug)]
pub struct WatchdogJob {
    kind: JobKind,
    interval_ms: AtomicU64,
    running: AtomicBool,
    pending_stop: AtomicBool,
    ticks: AtomicU64,
}

impl WatchdogJob {
    pub fn new(kind: JobKind, interval_ms: u64, running: bool) -> Self {
        Self {
            kind,
            interval_ms: AtomicU64::new(interval_ms.max(timing::MIN_INTERVAL_MS)),
            running: AtomicBool::new(running),
            pending_stop: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
        }
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms.load(Ordering::Relaxed)
    }

    /// Change the cadence; returns true if it actually changed
    pub fn set_interval_ms(&self, interval_ms: u64) -> bool {
        let interval_ms = interval_ms.max(timing::MIN_INTERVAL_MS);
        let previous = self.interval_ms.swap(interval_ms, Ordering::Relaxed);
        if previous != interval_ms {
            debug!("{} interval {} -> {} ms", self.kind, previous, interval_ms);
        }
        previous != interval_ms
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start (or keep running) and cancel any pending stop
    pub fn start(&self) {
        self.pending_stop.store(false, Ordering::Release);
        if !self.running.swap(true, Ordering::AcqRel) {
            info!("Watchdog {} started", self.kind);
        }
    }

    /// Ask the job to halt once its hardware has converged
    pub fn request_stop(&self) {
        if self.is_running() {
            self.pending_stop.store(true, Ordering::Release);
            debug!("Watchdog {} stop pending", self.kind);
        }
    }

    pub fn is_stop_pending(&self) -> bool {
        self.pending_stop.load(Ordering::Acquire)
    }

    /// Halt immediately
    pub fn stop(&self) {
        self.pending_stop.store(false, Ordering::Release);
        if self.running.swap(false, Ordering::AcqRel) {
            info!("Watchdog {} stopped", self.kind);
        }
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Ticks that ran past the running check
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}
