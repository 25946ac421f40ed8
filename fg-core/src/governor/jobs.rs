//! Watchdog tick functions
//!
//! Each job compares what was requested with what the hardware (or the
//! telemetry publisher) reports and reconciles the difference. Ticks take
//! their domain lock with `try_enter`; a busy domain drops the tick. No error
//! leaves a tick: everything is folded into a [`TickOutcome`].

use std::sync::atomic::Ordering;

use tracing::{debug, info, trace, warn};

use super::context::GovernorContext;
use super::job::{JobKind, SkipReason, TickOutcome};
use crate::constants::{gpu, tdp, timing};
use crate::data::{PowerRail, RequestOrigin};
use crate::engine::{ControlInput, ControlOutput};
use crate::error::FramegovError;
use crate::hw::{PowerScheme, ProcessorKind};
use crate::telemetry::{Connection, SignalSnapshot};

/// Run one tick of `kind` if the job is running
pub fn run_tick(ctx: &GovernorContext, kind: JobKind) -> TickOutcome {
    let job = ctx.job(kind);
    if !job.is_running() {
        return TickOutcome::Skipped(SkipReason::NotRunning);
    }
    job.record_tick();

    let outcome = match kind {
        JobKind::PowerScheme => power_scheme_tick(ctx),
        JobKind::CpuLimit => cpu_limit_tick(ctx),
        JobKind::GpuClock => gpu_clock_tick(ctx),
        JobKind::TelemetrySensor => telemetry_sensor_tick(ctx),
        JobKind::AutoTdp => auto_tdp_tick(ctx),
    };

    match &outcome {
        TickOutcome::Failed(reason) => warn!(job = %kind, "Tick failed: {}", reason),
        TickOutcome::Skipped(reason) => trace!(job = %kind, ?reason, "Tick skipped"),
        _ => {}
    }
    outcome
}

/// Re-apply the requested power scheme if something else changed it
pub fn power_scheme_tick(ctx: &GovernorContext) -> TickOutcome {
    let Some(_guard) = ctx.power.try_enter() else {
        return TickOutcome::Skipped(SkipReason::DomainBusy);
    };
    let Some(requested) = ctx.requested_power_scheme() else {
        return TickOutcome::Converged;
    };

    let control = &ctx.hardware.power;
    match control.active() {
        Ok(active) if active == requested => TickOutcome::Converged,
        Ok(active) => {
            info!("Power scheme changed to {:?}, re-applying {:?}", active, requested);
            match control.set_active(requested) {
                Ok(()) => TickOutcome::Completed,
                Err(e) => TickOutcome::Failed(e.to_string()),
            }
        }
        Err(e) => TickOutcome::Failed(e.to_string()),
    }
}

/// Reconcile every firmware rail (and Intel's MSR pair) with its request
pub fn cpu_limit_tick(ctx: &GovernorContext) -> TickOutcome {
    let processor = &ctx.hardware.processor;
    if !ctx.is_tdp_enabled() || !processor.is_initialized() {
        return TickOutcome::Skipped(SkipReason::ProcessorUnavailable);
    }
    let Some(mut state) = ctx.cpu.try_enter() else {
        return TickOutcome::Skipped(SkipReason::DomainBusy);
    };

    let job = ctx.job(JobKind::CpuLimit);
    let kind = processor.kind();
    let readback = &ctx.hardware.readback;
    let battery_scheme = ctx.requested_power_scheme() == Some(PowerScheme::BetterBattery);

    let mut rails_done = true;
    let mut degraded = false;
    let mut failures = Vec::new();

    for rail in PowerRail::REQUESTED {
        if !kind.has_rail(rail) {
            continue;
        }
        let Some(mut target) = ctx.requests.enforced(rail) else {
            continue;
        };
        // AMD firmware takes 10% off under the battery scheme
        if kind == ProcessorKind::Amd && battery_scheme {
            target = (target * tdp::AMD_BATTERY_SCHEME_FACTOR).trunc();
        }

        let read = readback.limit(rail);
        if read <= 0.0 || read > tdp::READBACK_MAX_WATTS {
            degraded = true;
        }
        if (read - target).abs() <= tdp::MATCH_TOLERANCE_WATTS {
            continue;
        }

        rails_done = false;
        debug!(rail = ?rail, read, target, "Applying TDP limit");
        match processor.set_tdp_limit(rail, target) {
            Ok(()) => state.writes += 1,
            Err(e) => failures.push(format!("{:?}: {}", rail, e)),
        }
    }

    if degraded != state.degraded {
        if degraded {
            warn!("TDP read-back degraded, slowing cpu-limit to {} ms", timing::LIMIT_INTERVAL_DEGRADED_MS);
        } else {
            info!("TDP read-back healthy again");
        }
        state.degraded = degraded;
    }
    job.set_interval_ms(if degraded {
        timing::LIMIT_INTERVAL_DEGRADED_MS
    } else {
        ctx.cpu_default_interval_ms
    });

    let mut msr_done = true;
    if kind.uses_msr() {
        let read_slow = readback.limit(PowerRail::MsrSlow);
        let read_fast = readback.limit(PowerRail::MsrFast);
        if read_slow == 0.0 || read_fast == 0.0 {
            let err = FramegovError::HardwareWriteSkipped("MSR read-back not available yet".into());
            debug!("{}", err);
            return TickOutcome::Skipped(SkipReason::NotReady(err.to_string()));
        }

        if let (Some(slow), Some(fast)) = (
            ctx.requests.enforced(PowerRail::Slow),
            ctx.requests.enforced(PowerRail::Fast),
        ) {
            // MSR limits are whole watts
            let (slow, fast) = (slow.trunc() as i32, fast.trunc() as i32);
            if read_slow != f64::from(slow) || read_fast != f64::from(fast) {
                msr_done = false;
                debug!(slow, fast, read_slow, read_fast, "Applying MSR limit");
                match processor.set_msr_limit(slow, fast) {
                    Ok(()) => state.writes += 1,
                    Err(e) => failures.push(format!("MSR: {}", e)),
                }
            }
        }
    }

    if !failures.is_empty() {
        return TickOutcome::Failed(failures.join("; "));
    }
    if rails_done && msr_done {
        if job.is_stop_pending() {
            job.stop();
            return TickOutcome::Stopped;
        }
        return TickOutcome::Converged;
    }
    TickOutcome::Completed
}

/// Reconcile the GPU clock with its request
pub fn gpu_clock_tick(ctx: &GovernorContext) -> TickOutcome {
    let processor = &ctx.hardware.processor;
    if !processor.is_initialized() {
        return TickOutcome::Skipped(SkipReason::ProcessorUnavailable);
    }
    let Some(_guard) = ctx.gpu.try_enter() else {
        return TickOutcome::Skipped(SkipReason::DomainBusy);
    };

    let current = ctx.hardware.readback.gfx_clock();
    if current == 0.0 {
        return TickOutcome::Skipped(SkipReason::NotReady("GPU clock read-back".into()));
    }
    let stored = ctx.stored_gfx_clock.get_or_zero();
    if stored == 0.0 {
        return TickOutcome::Skipped(SkipReason::NotReady("no GPU clock requested".into()));
    }

    if (current - stored).abs() > gpu::MATCH_TOLERANCE_MHZ {
        debug!(current, stored, "Applying GPU clock");
        return match processor.set_gpu_clock(stored) {
            Ok(()) => TickOutcome::Completed,
            Err(e) => TickOutcome::Failed(e.to_string()),
        };
    }

    let job = ctx.job(JobKind::GpuClock);
    if job.is_stop_pending() {
        job.stop();
        return TickOutcome::Stopped;
    }
    TickOutcome::Converged
}

/// Poll telemetry and publish the controller signals
///
/// Every `connection_check_ms` the channel re-checks that the region is still
/// published (and attaches if it was not).
pub fn telemetry_sensor_tick(ctx: &GovernorContext) -> TickOutcome {
    let Some(mut state) = ctx.telemetry.try_enter() else {
        return TickOutcome::Skipped(SkipReason::DomainBusy);
    };

    let interval = ctx.job(JobKind::TelemetrySensor).interval_ms();
    state.since_connection_check_ms = state.since_connection_check_ms.saturating_add(interval);
    if state.since_connection_check_ms >= ctx.settings.intervals.connection_check_ms {
        state.since_connection_check_ms = 0;
        match state.channel.connect() {
            Ok(Connection::Established) => ctx.signals.set_connected(true),
            Ok(Connection::AlreadyConnected) => {}
            Err(e) => {
                ctx.signals.set_connected(false);
                debug!("Telemetry connection check failed: {}", e);
                return TickOutcome::Skipped(SkipReason::Disconnected);
            }
        }
    }

    if !state.channel.is_connected() {
        return TickOutcome::Skipped(SkipReason::Disconnected);
    }

    if let Err(e) = state.channel.poll_readings() {
        if e.is_telemetry_loss() {
            ctx.signals.set_connected(false);
            warn!("Telemetry lost: {}", e);
            return TickOutcome::Skipped(SkipReason::Disconnected);
        }
        return TickOutcome::Failed(e.to_string());
    }

    let snapshot = SignalSnapshot::extract(&state.channel, &state.sources);
    ctx.signals.publish(&snapshot);
    debug!(
        frame_time_ms = ?snapshot.frame_time_ms,
        framerate = ?snapshot.framerate,
        package_power = ?snapshot.package_power_watts,
        "TDPControlData"
    );
    TickOutcome::Completed
}

/// Advance the adaptive controller and hand its setpoint to the CPU limit job
pub fn auto_tdp_tick(ctx: &GovernorContext) -> TickOutcome {
    let Some(mut controller) = ctx.auto_tdp.try_enter() else {
        return TickOutcome::Skipped(SkipReason::DomainBusy);
    };

    // stale values stay readable for status but never drive the controller
    let signals = if ctx.signals.is_connected() {
        ctx.signals.snapshot()
    } else {
        SignalSnapshot::default()
    };
    let input = ControlInput {
        framerate: signals.framerate,
        package_power: signals.package_power_watts,
        fps_target: ctx.fps_target(),
        stop_requested: ctx.auto_tdp_stop.load(Ordering::Acquire),
    };

    match controller.tick(&input) {
        ControlOutput::Hold => {
            TickOutcome::Skipped(SkipReason::NotReady("no usable frame rate or package power".into()))
        }
        ControlOutput::Setpoint(watts) => {
            ctx.setpoint.publish(watts);
            match ctx.request_tdp_all([watts; 3], RequestOrigin::Controller) {
                Ok(()) => TickOutcome::Completed,
                Err(e) => TickOutcome::Failed(e.to_string()),
            }
        }
        ControlOutput::Stopped => {
            if let Err(e) = ctx.remember_curve(controller.curve()) {
                warn!("Calibrated curve not kept: {}", e);
            }
            ctx.setpoint.clear();
            ctx.restore_baseline();
            ctx.auto_tdp_stop.store(false, Ordering::Release);
            ctx.job(JobKind::AutoTdp).stop();
            if !ctx.settings.tdp_watchdog_enabled {
                ctx.stop_cpu_limit();
            }
            info!("AutoTDP stopped, baseline limits restored");
            TickOutcome::Stopped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CurveNode, CurveStore, GovernorSettings, Profile};
    use crate::engine::ControllerState;
    use crate::error::Result;
    use crate::governor::context::Hardware;
    use crate::hw::{HardwareReadback, MemoryPowerScheme, PowerSchemeControl, Processor};
    use crate::telemetry::layout::encode::{region, GroupSpec};
    use crate::telemetry::{MemoryOpener, SignalSources, TelemetryChannel};
    use parking_lot::Mutex;
    use std::sync::Arc;

    const SHM: &str = "SENS";
    const CPU_GROUP: &str = "CPU [#0]: Test APU: Enhanced";

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Tdp(PowerRail, f64),
        Msr(i32, i32),
        Gpu(f64),
    }

    /// Records every write; echoes it into the read-back when `echo` is set
    struct RecordingProcessor {
        kind: ProcessorKind,
        echo: bool,
        readback: Arc<HardwareReadback>,
        calls: Mutex<Vec<Call>>,
    }

    impl RecordingProcessor {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }
    }

    impl Processor for RecordingProcessor {
        fn kind(&self) -> ProcessorKind {
            self.kind
        }
        fn is_initialized(&self) -> bool {
            true
        }
        fn set_tdp_limit(&self, rail: PowerRail, watts: f64) -> Result<()> {
            self.calls.lock().push(Call::Tdp(rail, watts));
            if self.echo {
                self.readback.set_limit(rail, watts);
            }
            Ok(())
        }
        fn set_msr_limit(&self, slow: i32, fast: i32) -> Result<()> {
            self.calls.lock().push(Call::Msr(slow, fast));
            if self.echo {
                self.readback.set_limit(PowerRail::MsrSlow, f64::from(slow));
                self.readback.set_limit(PowerRail::MsrFast, f64::from(fast));
            }
            Ok(())
        }
        fn set_gpu_clock(&self, mhz: f64) -> Result<()> {
            self.calls.lock().push(Call::Gpu(mhz));
            if self.echo {
                self.readback.set_gfx_clock(mhz);
            }
            Ok(())
        }
        fn stop(&self) {}
    }

    struct Fixture {
        ctx: GovernorContext,
        cpu: Arc<RecordingProcessor>,
        power: Arc<MemoryPowerScheme>,
        opener: MemoryOpener,
    }

    fn fixture_with(kind: ProcessorKind, echo: bool, settings: GovernorSettings) -> Fixture {
        let readback = Arc::new(HardwareReadback::new());
        let cpu = Arc::new(RecordingProcessor {
            kind,
            echo,
            readback: readback.clone(),
            calls: Mutex::new(Vec::new()),
        });
        let power = Arc::new(MemoryPowerScheme::default());
        let opener = MemoryOpener::new();
        let channel = TelemetryChannel::new(Arc::new(opener.clone()), SHM);
        let sources = SignalSources {
            overlay_group: "RTSS".into(),
            cpu_group: CPU_GROUP.into(),
        };
        let hardware = Hardware {
            processor: cpu.clone(),
            power: power.clone(),
            readback,
        };
        let ctx = GovernorContext::with_sources(settings, hardware, channel, sources);
        Fixture {
            ctx,
            cpu,
            power,
            opener,
        }
    }

    fn fixture(kind: ProcessorKind, echo: bool) -> Fixture {
        fixture_with(kind, echo, GovernorSettings::default())
    }

    fn publish_telemetry(opener: &MemoryOpener, fps: f64, watts: f64) {
        opener.publish(
            SHM,
            region(&[
                GroupSpec::new("RTSS", &[("Framerate", fps), ("Frame Time", 1000.0 / fps)]),
                GroupSpec::new(CPU_GROUP, &[("CPU Package Power", watts)]),
            ]),
        );
    }

    #[test]
    fn test_stopped_job_does_not_tick() {
        let f = fixture(ProcessorKind::Amd, true);
        assert_eq!(
            run_tick(&f.ctx, JobKind::CpuLimit),
            TickOutcome::Skipped(SkipReason::NotRunning)
        );
        assert!(f.cpu.calls().is_empty());
        assert_eq!(f.ctx.job(JobKind::CpuLimit).ticks(), 0);
    }

    #[test]
    fn test_held_cpu_lock_skips_tick() {
        let f = fixture(ProcessorKind::Amd, true);
        f.ctx.start_cpu_limit();

        let held = f.ctx.cpu.enter();
        assert_eq!(
            run_tick(&f.ctx, JobKind::CpuLimit),
            TickOutcome::Skipped(SkipReason::DomainBusy)
        );
        assert!(f.cpu.calls().is_empty());
        assert_eq!(f.ctx.cpu.skipped_ticks(), 1);
        drop(held);

        assert_eq!(run_tick(&f.ctx, JobKind::CpuLimit), TickOutcome::Completed);
        assert_eq!(f.cpu.calls().len(), 3);
    }

    #[test]
    fn test_cpu_limit_writes_only_differences() {
        let f = fixture(ProcessorKind::Amd, false);
        f.ctx.start_cpu_limit();
        f.ctx.on_limit_changed(PowerRail::Slow, 15.0);
        f.ctx.on_limit_changed(PowerRail::Stapm, 15.3);
        f.ctx.on_limit_changed(PowerRail::Fast, 25.0);

        assert_eq!(run_tick(&f.ctx, JobKind::CpuLimit), TickOutcome::Completed);
        assert_eq!(f.cpu.calls(), vec![Call::Tdp(PowerRail::Fast, 20.0)]);
    }

    #[test]
    fn test_pending_stop_waits_for_convergence() {
        let f = fixture(ProcessorKind::Amd, false);
        f.ctx.start_cpu_limit();
        f.ctx.stop_cpu_limit();

        // read-back still differs: the job keeps running and writing
        assert_eq!(run_tick(&f.ctx, JobKind::CpuLimit), TickOutcome::Completed);
        assert!(f.ctx.job(JobKind::CpuLimit).is_running());

        f.ctx.on_limit_changed(PowerRail::Slow, 15.0);
        f.ctx.on_limit_changed(PowerRail::Stapm, 15.0);
        assert_eq!(run_tick(&f.ctx, JobKind::CpuLimit), TickOutcome::Completed);
        assert!(f.ctx.job(JobKind::CpuLimit).is_running());

        f.ctx.on_limit_changed(PowerRail::Fast, 20.0);
        assert_eq!(run_tick(&f.ctx, JobKind::CpuLimit), TickOutcome::Stopped);
        assert!(!f.ctx.job(JobKind::CpuLimit).is_running());
    }

    #[test]
    fn test_degraded_readback_widens_interval() {
        let f = fixture(ProcessorKind::Amd, true);
        f.ctx.start_cpu_limit();
        let job = f.ctx.job(JobKind::CpuLimit);

        // nothing read back yet
        run_tick(&f.ctx, JobKind::CpuLimit);
        assert_eq!(job.interval_ms(), timing::LIMIT_INTERVAL_DEGRADED_MS);

        // echoed writes are now visible
        assert_eq!(run_tick(&f.ctx, JobKind::CpuLimit), TickOutcome::Converged);
        assert_eq!(job.interval_ms(), timing::LIMIT_INTERVAL_MS);

        f.ctx.on_limit_changed(PowerRail::Fast, 300.0);
        run_tick(&f.ctx, JobKind::CpuLimit);
        assert_eq!(job.interval_ms(), timing::LIMIT_INTERVAL_DEGRADED_MS);
    }

    #[test]
    fn test_amd_battery_scheme_truncates_targets() {
        let f = fixture(ProcessorKind::Amd, false);
        f.ctx.start_cpu_limit();
        f.ctx.request_power_scheme(0).unwrap();

        run_tick(&f.ctx, JobKind::CpuLimit);
        assert_eq!(
            f.cpu.calls(),
            vec![
                Call::Tdp(PowerRail::Slow, 13.0),
                Call::Tdp(PowerRail::Stapm, 13.0),
                Call::Tdp(PowerRail::Fast, 18.0),
            ]
        );
    }

    #[test]
    fn test_intel_skips_stapm_and_waits_for_msr() {
        let f = fixture(ProcessorKind::Intel, false);
        assert_eq!(
            f.ctx.job(JobKind::CpuLimit).interval_ms(),
            timing::LIMIT_INTERVAL_INTEL_MS
        );
        f.ctx.start_cpu_limit();
        f.ctx.request_tdp(PowerRail::Slow, 12.7, RequestOrigin::User).unwrap();

        let outcome = run_tick(&f.ctx, JobKind::CpuLimit);
        assert!(matches!(outcome, TickOutcome::Skipped(SkipReason::NotReady(_))));
        assert_eq!(
            f.cpu.calls(),
            vec![
                Call::Tdp(PowerRail::Slow, 12.7),
                Call::Tdp(PowerRail::Fast, 20.0)
            ]
        );

        f.ctx.on_limit_changed(PowerRail::Slow, 12.7);
        f.ctx.on_limit_changed(PowerRail::Fast, 20.0);
        f.ctx.on_limit_changed(PowerRail::MsrSlow, 15.0);
        f.ctx.on_limit_changed(PowerRail::MsrFast, 20.0);
        assert_eq!(run_tick(&f.ctx, JobKind::CpuLimit), TickOutcome::Completed);
        assert_eq!(f.cpu.calls().last(), Some(&Call::Msr(12, 20)));

        f.ctx.on_limit_changed(PowerRail::MsrSlow, 12.0);
        assert_eq!(run_tick(&f.ctx, JobKind::CpuLimit), TickOutcome::Converged);
    }

    #[test]
    fn test_blocked_register_access_disables_tdp() {
        let mut settings = GovernorSettings::default();
        settings.tdp_watchdog_enabled = true;
        let f = fixture_with(ProcessorKind::Intel, true, settings);
        assert!(f.ctx.job(JobKind::CpuLimit).is_running());

        let err = f.ctx.initialize_with_policy(true).unwrap_err();
        assert!(matches!(err, FramegovError::InitializationBlocked(_)));
        assert!(!f.ctx.job(JobKind::CpuLimit).is_running());
        assert!(f.ctx.job(JobKind::TelemetrySensor).is_running());
        assert!(!f.ctx.is_tdp_enabled());

        f.ctx.start_cpu_limit();
        assert_eq!(
            run_tick(&f.ctx, JobKind::CpuLimit),
            TickOutcome::Skipped(SkipReason::ProcessorUnavailable)
        );
    }

    #[test]
    fn test_blocked_policy_ignored_on_amd() {
        let f = fixture(ProcessorKind::Amd, true);
        assert!(f.ctx.initialize_with_policy(true).is_ok());
        assert!(f.ctx.is_tdp_enabled());
    }

    #[test]
    fn test_gpu_clock_reconciles_and_stops() {
        let f = fixture(ProcessorKind::Amd, true);
        f.ctx.start_gpu_clock();
        f.ctx.request_gpu_clock(1600.0, RequestOrigin::User);

        // no read-back from the driver yet
        assert!(matches!(
            run_tick(&f.ctx, JobKind::GpuClock),
            TickOutcome::Skipped(SkipReason::NotReady(_))
        ));

        f.ctx.on_gfx_clock_changed(800.0);
        assert_eq!(run_tick(&f.ctx, JobKind::GpuClock), TickOutcome::Completed);
        assert_eq!(f.cpu.calls(), vec![Call::Gpu(1600.0)]);

        f.ctx.stop_gpu_clock();
        assert_eq!(run_tick(&f.ctx, JobKind::GpuClock), TickOutcome::Stopped);
        assert!(!f.ctx.job(JobKind::GpuClock).is_running());
    }

    #[test]
    fn test_power_scheme_reapplied_on_mismatch() {
        let f = fixture(ProcessorKind::Amd, true);
        f.ctx.start_power_scheme();
        assert_eq!(run_tick(&f.ctx, JobKind::PowerScheme), TickOutcome::Converged);

        f.ctx.request_power_scheme(2).unwrap();
        assert_eq!(run_tick(&f.ctx, JobKind::PowerScheme), TickOutcome::Converged);

        f.power.set_active(PowerScheme::BetterBattery).unwrap();
        assert_eq!(run_tick(&f.ctx, JobKind::PowerScheme), TickOutcome::Completed);
        assert_eq!(f.power.active().unwrap(), PowerScheme::BestPerformance);
        assert!(f.ctx.request_power_scheme(3).is_err());
    }

    #[test]
    fn test_sensor_publishes_signals_and_tracks_loss() {
        let f = fixture(ProcessorKind::Amd, true);
        assert_eq!(
            run_tick(&f.ctx, JobKind::TelemetrySensor),
            TickOutcome::Skipped(SkipReason::Disconnected)
        );
        assert!(!f.ctx.signals().is_connected());

        publish_telemetry(&f.opener, 58.0, 14.2);
        // next connection check is 3000 ms away
        for _ in 0..29 {
            assert_eq!(
                run_tick(&f.ctx, JobKind::TelemetrySensor),
                TickOutcome::Skipped(SkipReason::Disconnected)
            );
        }
        assert_eq!(run_tick(&f.ctx, JobKind::TelemetrySensor), TickOutcome::Completed);
        assert!(f.ctx.signals().is_connected());
        let snap = f.ctx.signals().snapshot();
        assert_eq!(snap.framerate, Some(58.0));
        assert_eq!(snap.package_power_watts, Some(14.2));

        f.opener.remove(SHM);
        for _ in 0..30 {
            run_tick(&f.ctx, JobKind::TelemetrySensor);
        }
        assert!(!f.ctx.signals().is_connected());
        // stale values stay readable
        assert_eq!(f.ctx.signals().snapshot().framerate, Some(58.0));
    }

    #[test]
    fn test_auto_tdp_drives_cpu_limit_and_restores_baseline() {
        let f = fixture(ProcessorKind::Amd, true);
        f.ctx.signals.framerate.publish(40.0);
        f.ctx.signals.package_power_watts.publish(11.0);
        f.ctx.signals.set_connected(true);
        f.ctx.start_auto_tdp();
        assert!(f.ctx.job(JobKind::CpuLimit).is_running());

        assert_eq!(run_tick(&f.ctx, JobKind::AutoTdp), TickOutcome::Completed);
        assert_eq!(f.ctx.controller_state(), ControllerState::BiasCalibration);
        assert_eq!(f.ctx.setpoint(), Some(11.0));
        assert_eq!(f.ctx.requests().enforced(PowerRail::Fast), Some(11.0));

        run_tick(&f.ctx, JobKind::CpuLimit);
        assert!(f.cpu.calls().contains(&Call::Tdp(PowerRail::Fast, 11.0)));

        f.ctx.stop_auto_tdp();
        assert_eq!(run_tick(&f.ctx, JobKind::AutoTdp), TickOutcome::Stopped);
        assert!(!f.ctx.job(JobKind::AutoTdp).is_running());
        assert_eq!(f.ctx.controller_state(), ControllerState::Idle);
        assert_eq!(f.ctx.setpoint(), None);
        assert_eq!(f.ctx.requests().enforced(PowerRail::Slow), Some(15.0));
        assert_eq!(f.ctx.requests().enforced(PowerRail::Fast), Some(20.0));
        assert!(f.ctx.job(JobKind::CpuLimit).is_stop_pending());
    }

    #[test]
    fn test_auto_tdp_holds_without_telemetry() {
        let f = fixture(ProcessorKind::Amd, true);
        f.ctx.start_auto_tdp();
        assert!(matches!(
            run_tick(&f.ctx, JobKind::AutoTdp),
            TickOutcome::Skipped(SkipReason::NotReady(_))
        ));
        assert_eq!(f.ctx.controller_state(), ControllerState::Idle);
    }

    #[test]
    fn test_auto_tdp_holds_after_telemetry_loss() {
        let f = fixture(ProcessorKind::Amd, true);
        publish_telemetry(&f.opener, 30.0, 8.0);
        f.ctx.start_auto_tdp();

        assert_eq!(run_tick(&f.ctx, JobKind::TelemetrySensor), TickOutcome::Completed);
        assert_eq!(run_tick(&f.ctx, JobKind::AutoTdp), TickOutcome::Completed);
        assert_eq!(f.ctx.setpoint(), Some(8.0));

        f.opener.remove(SHM);
        for _ in 0..40 {
            run_tick(&f.ctx, JobKind::TelemetrySensor);
        }
        assert!(!f.ctx.signals().is_connected());
        assert_eq!(f.ctx.signals().snapshot().framerate, Some(30.0));

        for _ in 0..300 {
            assert!(matches!(
                run_tick(&f.ctx, JobKind::AutoTdp),
                TickOutcome::Skipped(SkipReason::NotReady(_))
            ));
        }
        assert_eq!(f.ctx.setpoint(), Some(8.0));
        assert_eq!(f.ctx.controller_state(), ControllerState::BiasCalibration);

        // a stop request still goes through while disconnected
        f.ctx.stop_auto_tdp();
        assert_eq!(run_tick(&f.ctx, JobKind::AutoTdp), TickOutcome::Stopped);
        assert_eq!(f.ctx.setpoint(), None);
    }

    #[test]
    fn test_stopping_auto_tdp_keeps_calibrated_curve() {
        let f = fixture(ProcessorKind::Amd, true);
        let nodes = vec![
            CurveNode::new(5.0, 15.0),
            CurveNode::new(10.0, 54.0),
            CurveNode::new(15.0, 74.0),
            CurveNode::new(20.0, 80.0),
            CurveNode::new(25.0, 84.0),
        ];
        let mut store = CurveStore::new();
        store.upsert("Game", nodes.clone()).unwrap();
        f.ctx.set_curve_store(store);
        f.ctx.load_curve_for("Game").unwrap();
        f.ctx.set_fps_target(60.0).unwrap();

        // 40 fps at 11 W where the stored curve predicts 58 fps
        f.ctx.signals.framerate.publish(40.0);
        f.ctx.signals.package_power_watts.publish(11.0);
        f.ctx.signals.set_connected(true);
        f.ctx.start_auto_tdp();
        assert_eq!(run_tick(&f.ctx, JobKind::AutoTdp), TickOutcome::Completed);
        assert_eq!(run_tick(&f.ctx, JobKind::AutoTdp), TickOutcome::Completed);
        let calibrated = f.ctx.curve();
        assert!(calibrated.expected_fps(15.0) < 74.0);

        f.ctx.stop_auto_tdp();
        assert_eq!(run_tick(&f.ctx, JobKind::AutoTdp), TickOutcome::Stopped);
        let kept = f.ctx.curve_store();
        assert_eq!(kept.get("Game"), Some(calibrated.nodes()));
        assert_ne!(kept.get("Game"), Some(nodes.as_slice()));

        // nothing changed since: a second write-back is a no-op
        assert!(!f.ctx.remember_calibrated_curve().unwrap());
    }

    #[test]
    fn test_curve_not_kept_without_application() {
        let f = fixture(ProcessorKind::Amd, true);
        f.ctx.signals.framerate.publish(40.0);
        f.ctx.signals.package_power_watts.publish(11.0);
        f.ctx.signals.set_connected(true);
        f.ctx.start_auto_tdp();
        run_tick(&f.ctx, JobKind::AutoTdp);
        run_tick(&f.ctx, JobKind::AutoTdp);

        f.ctx.stop_auto_tdp();
        assert_eq!(run_tick(&f.ctx, JobKind::AutoTdp), TickOutcome::Stopped);
        assert!(f.ctx.curve_store().is_empty());
    }

    #[test]
    fn test_profile_apply_and_discard() {
        let f = fixture(ProcessorKind::Amd, true);
        let profile = Profile {
            name: "handheld".into(),
            application: None,
            tdp_override: true,
            tdp_value: Some([9.0, 9.0, 12.0]),
        };

        f.ctx.apply_profile(&profile).unwrap();
        assert!(f.ctx.job(JobKind::CpuLimit).is_running());
        assert_eq!(f.ctx.requests().enforced(PowerRail::Slow), Some(9.0));
        assert_eq!(f.ctx.requests().fallback()[0], Some(15.0));
        assert_eq!(f.ctx.requests().baseline()[2], Some(12.0));

        f.ctx.discard_profile(&profile).unwrap();
        assert_eq!(f.ctx.requests().enforced(PowerRail::Slow), Some(15.0));
        assert!(f.ctx.job(JobKind::CpuLimit).is_stop_pending());
    }

    #[test]
    fn test_msr_rails_cannot_be_requested() {
        let f = fixture(ProcessorKind::Intel, true);
        assert!(f
            .ctx
            .request_tdp(PowerRail::MsrSlow, 10.0, RequestOrigin::User)
            .is_err());
        assert!(f
            .ctx
            .request_tdp(PowerRail::Slow, f64::NAN, RequestOrigin::User)
            .is_err());
    }
}
