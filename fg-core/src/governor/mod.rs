//! Watchdog governor
//!
//! The shared context, the per-job lock domains and the five tick functions
//! the scheduler drives.

mod context;
mod domain;
mod job;
mod jobs;

pub use context::{CpuLimitState, GovernorContext, Hardware, TdpRequests, TelemetryState};
pub use domain::{LockDomain, PublishedValue};
pub use job::{JobKind, SkipReason, TickOutcome, WatchdogJob};
pub use jobs::{
    auto_tdp_tick, cpu_limit_tick, gpu_clock_tick, power_scheme_tick, run_tick,
    telemetry_sensor_tick,
};
