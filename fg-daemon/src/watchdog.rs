//! Watchdog scheduler
//!
//! One tokio interval per job. Every tick is handed to the blocking pool
//! without waiting for the previous one, so a slow tick overlaps the next
//! timer firing and that tick drops itself on the busy lock domain. Missed
//! timer ticks are skipped, never replayed.
//!
//! - **Interval changes**: a job's timer is rebuilt when its interval changes
//!   (e.g. the CPU limit job backing off on degraded read-back)
//! - **Panic isolation**: a panicking tick surfaces as a `JoinError` and is
//!   logged; the job keeps its timer

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fg_core::governor::{run_tick, GovernorContext, JobKind};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

pub struct WatchdogScheduler {
    ctx: Arc<GovernorContext>,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

fn job_interval(ms: u64) -> Interval {
    let mut ticker = interval(Duration::from_millis(ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

impl WatchdogScheduler {
    pub fn new(ctx: Arc<GovernorContext>) -> Self {
        Self {
            ctx,
            shutdown: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
        }
    }

    /// Handle for requesting shutdown from another task or thread
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shutdown: self.shutdown.clone(),
            wake: self.wake.clone(),
        }
    }

    /// Spawn one timer task per job
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        JobKind::ALL
            .into_iter()
            .map(|kind| {
                let ctx = self.ctx.clone();
                let shutdown = self.shutdown.clone();
                let wake = self.wake.clone();
                tokio::spawn(run_job(ctx, kind, shutdown, wake))
            })
            .collect()
    }

    /// Run all jobs until shutdown is requested
    pub async fn run(self) {
        let handles = self.spawn();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Watchdog task ended abnormally: {}", e);
            }
        }
        self.ctx.stop_all();
        info!("Watchdog scheduler stopped");
    }
}

#[derive(Clone)]
pub struct ShutdownHandle {
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

async fn run_job(
    ctx: Arc<GovernorContext>,
    kind: JobKind,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
) {
    let mut period_ms = ctx.job(kind).interval_ms();
    let mut ticker = job_interval(period_ms);
    debug!("Watchdog {} timer every {} ms", kind, period_ms);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = wake.notified() => {}
        }
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        if ctx.job(kind).is_running() {
            let tick_ctx = ctx.clone();
            let tick = tokio::task::spawn_blocking(move || run_tick(&tick_ctx, kind));
            tokio::spawn(async move {
                if let Err(e) = tick.await {
                    error!("Watchdog {} tick panicked: {}", kind, e);
                }
            });
        }

        let current_ms = ctx.job(kind).interval_ms();
        if current_ms != period_ms {
            debug!("Watchdog {} timer {} -> {} ms", kind, period_ms, current_ms);
            period_ms = current_ms;
            ticker = job_interval(period_ms);
            // a fresh interval fires immediately; consume that tick
            ticker.tick().await;
        }
    }
    debug!("Watchdog {} timer stopped", kind);
}

#[cfg(test)]
mod tests {
    use super::*;
    use fg_core::data::{GovernorSettings, PowerRail};
    use fg_core::hw::{DryRunProcessor, HardwareReadback, MemoryPowerScheme, ProcessorKind};
    use fg_core::governor::Hardware;
    use fg_core::telemetry::{MemoryOpener, SignalSources, TelemetryChannel};

    fn context() -> Arc<GovernorContext> {
        let mut settings = GovernorSettings::default();
        settings.intervals.limit_ms = 20;
        settings.intervals.power_scheme_ms = 20;
        settings.intervals.sensor_ms = 20;
        settings.intervals.auto_tdp_ms = 20;

        let readback = Arc::new(HardwareReadback::new());
        let hardware = Hardware {
            processor: Arc::new(DryRunProcessor::new(ProcessorKind::Amd, readback.clone())),
            power: Arc::new(MemoryPowerScheme::default()),
            readback,
        };
        let channel = TelemetryChannel::new(Arc::new(MemoryOpener::new()), "SENS");
        let sources = SignalSources {
            overlay_group: "RTSS".into(),
            cpu_group: "CPU".into(),
        };
        Arc::new(GovernorContext::with_sources(settings, hardware, channel, sources))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_scheduler_drives_cpu_limit_and_shuts_down() {
        let ctx = context();
        // healthy but stale read-back keeps the job at its normal cadence
        for rail in [PowerRail::Slow, PowerRail::Stapm, PowerRail::Fast] {
            ctx.on_limit_changed(rail, 10.0);
        }
        ctx.start_cpu_limit();
        ctx.stop_cpu_limit();

        let scheduler = WatchdogScheduler::new(ctx.clone());
        let handle = scheduler.shutdown_handle();
        let run = tokio::spawn(scheduler.run());

        let mut converged = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if !ctx.job(JobKind::CpuLimit).is_running() {
                converged = true;
                break;
            }
        }
        assert!(converged, "cpu-limit never reached its pending stop");
        assert_eq!(ctx.readback().limit(PowerRail::Slow), 15.0);
        assert_eq!(ctx.readback().limit(PowerRail::Fast), 20.0);

        handle.shutdown();
        assert!(handle.is_shutdown());
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("scheduler did not stop")
            .unwrap();
        assert!(JobKind::ALL.iter().all(|k| !ctx.job(*k).is_running()));
    }
}
