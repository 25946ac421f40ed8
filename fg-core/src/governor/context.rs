//! Governor context
//!
//! One owned object holds everything the five watchdog jobs share: the
//! hardware collaborators, the requested limits, the per-job lock domains and
//! the published values that cross between them. It is created at startup,
//! handed to every tick by reference and dropped at shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::domain::{LockDomain, PublishedValue};
use super::job::{JobKind, WatchdogJob};
use crate::constants::{telemetry as telemetry_names, timing};
use crate::data::{CurveStore, GovernorSettings, PowerRail, Profile, RequestOrigin};
use crate::engine::{AdaptiveController, ControllerState, PerformanceCurve};
use crate::error::{FramegovError, Result};
use crate::hw::{HardwareReadback, PowerScheme, PowerSchemeControl, Processor, ProcessorKind};
use crate::system;
use crate::telemetry::{SignalSources, TelemetryChannel, TelemetrySignals};

/// Hardware collaborators handed to the governor
#[derive(Clone)]
pub struct Hardware {
    pub processor: Arc<dyn Processor>,
    pub power: Arc<dyn PowerSchemeControl>,
    /// Shared with the processor driver, which reports applied values here
    pub readback: Arc<HardwareReadback>,
}

/// Requested limits for the three firmware rails
#[derive(Debug, Default)]
pub struct TdpRequests {
    /// What the CPU limit job enforces
    enforced: [PublishedValue; 3],
    /// Last user choice; restored when a profile goes away
    fallback: [PublishedValue; 3],
    /// Last user or profile choice; restored when AutoTDP stops
    baseline: [PublishedValue; 3],
}

impl TdpRequests {
    fn record(&self, idx: usize, watts: f64, origin: RequestOrigin) {
        self.enforced[idx].publish(watts);
        match origin {
            RequestOrigin::User => {
                self.fallback[idx].publish(watts);
                self.baseline[idx].publish(watts);
            }
            RequestOrigin::Profile => self.baseline[idx].publish(watts),
            RequestOrigin::Controller => {}
        }
    }

    pub fn enforced(&self, rail: PowerRail) -> Option<f64> {
        self.enforced.get(rail.index()).and_then(|v| v.get())
    }

    pub fn fallback(&self) -> [Option<f64>; 3] {
        [0, 1, 2].map(|i| self.fallback[i].get())
    }

    pub fn baseline(&self) -> [Option<f64>; 3] {
        [0, 1, 2].map(|i| self.baseline[i].get())
    }
}

/// CPU limit domain bookkeeping
#[derive(Debug, Default)]
pub struct CpuLimitState {
    pub degraded: bool,
    pub writes: u64,
}

/// Telemetry domain: the channel plus the connection check countdown
pub struct TelemetryState {
    pub channel: TelemetryChannel,
    pub sources: SignalSources,
    pub since_connection_check_ms: u64,
}

pub struct GovernorContext {
    pub(crate) settings: GovernorSettings,
    pub(crate) hardware: Hardware,
    pub(crate) requests: TdpRequests,
    pub(crate) stored_gfx_clock: PublishedValue,
    pub(crate) fallback_gfx_clock: PublishedValue,
    pub(crate) requested_scheme: Mutex<Option<PowerScheme>>,
    pub(crate) cpu: LockDomain<CpuLimitState>,
    pub(crate) gpu: LockDomain<()>,
    pub(crate) power: LockDomain<()>,
    pub(crate) auto_tdp: LockDomain<AdaptiveController>,
    pub(crate) telemetry: LockDomain<TelemetryState>,
    pub(crate) signals: TelemetrySignals,
    /// Latest AutoTDP output
    pub(crate) setpoint: PublishedValue,
    pub(crate) fps_target: PublishedValue,
    pub(crate) auto_tdp_stop: AtomicBool,
    /// False once register access was found blocked
    pub(crate) tdp_enabled: AtomicBool,
    pub(crate) cpu_default_interval_ms: u64,
    curves: RwLock<CurveStore>,
    /// Application whose curve the controller runs on
    application: Mutex<Option<String>>,
    jobs: [WatchdogJob; 5],
}

impl GovernorContext {
    /// Build the context and record the startup requests from `settings`
    pub fn new(
        settings: GovernorSettings,
        hardware: Hardware,
        channel: TelemetryChannel,
    ) -> Result<Self> {
        let settings = settings.validate()?;
        let cpu_group = settings
            .telemetry
            .cpu_sensor_group
            .clone()
            .unwrap_or_else(|| telemetry_names::cpu_group_name(&system::cpu_model()));
        let sources = SignalSources {
            overlay_group: settings.telemetry.overlay_group.clone(),
            cpu_group,
        };
        Ok(Self::with_sources(settings, hardware, channel, sources))
    }

    /// Build the context with explicit signal group names
    pub fn with_sources(
        settings: GovernorSettings,
        hardware: Hardware,
        channel: TelemetryChannel,
        sources: SignalSources,
    ) -> Self {
        let i = &settings.intervals;
        // Intel limit writes go through MSRs; poll them less often
        let cpu_default_interval_ms = match hardware.processor.kind() {
            ProcessorKind::Intel => timing::LIMIT_INTERVAL_INTEL_MS.max(i.limit_ms),
            _ => i.limit_ms,
        };
        let jobs = [
            WatchdogJob::new(JobKind::PowerScheme, i.power_scheme_ms, false),
            WatchdogJob::new(
                JobKind::CpuLimit,
                cpu_default_interval_ms,
                settings.tdp_watchdog_enabled,
            ),
            WatchdogJob::new(JobKind::GpuClock, i.limit_ms, false),
            WatchdogJob::new(JobKind::TelemetrySensor, i.sensor_ms, true),
            WatchdogJob::new(JobKind::AutoTdp, i.auto_tdp_ms, false),
        ];

        debug!(
            "Signal sources: overlay '{}', cpu '{}'",
            sources.overlay_group, sources.cpu_group
        );
        let controller = AdaptiveController::from_settings(&settings, PerformanceCurve::default());

        let ctx = Self {
            requests: TdpRequests::default(),
            stored_gfx_clock: PublishedValue::new(),
            fallback_gfx_clock: PublishedValue::new(),
            requested_scheme: Mutex::new(None),
            cpu: LockDomain::new("cpu-limit", CpuLimitState::default()),
            gpu: LockDomain::new("gpu-clock", ()),
            power: LockDomain::new("power-scheme", ()),
            auto_tdp: LockDomain::new("auto-tdp", controller),
            telemetry: LockDomain::new(
                "telemetry",
                TelemetryState {
                    channel,
                    sources,
                    // check the connection on the very first sensor tick
                    since_connection_check_ms: u64::MAX,
                },
            ),
            signals: TelemetrySignals::new(),
            setpoint: PublishedValue::new(),
            fps_target: PublishedValue::with_value(settings.auto_tdp_fps_target),
            auto_tdp_stop: AtomicBool::new(false),
            tdp_enabled: AtomicBool::new(true),
            cpu_default_interval_ms,
            curves: RwLock::new(CurveStore::new()),
            application: Mutex::new(None),
            jobs,
            hardware,
            settings,
        };

        let sustained = ctx.settings.tdp_sustained_watts;
        let boost = ctx.settings.tdp_boost_watts;
        for (rail, watts) in [
            (PowerRail::Slow, sustained),
            (PowerRail::Stapm, sustained),
            (PowerRail::Fast, boost),
        ] {
            if let Err(e) = ctx.request_tdp(rail, watts, RequestOrigin::User) {
                warn!("Ignoring startup TDP request for {:?}: {}", rail, e);
            }
        }
        // a zero clock means "leave the GPU alone"
        if ctx.settings.gpu_clock_mhz != 0.0 {
            ctx.request_gpu_clock(ctx.settings.gpu_clock_mhz, RequestOrigin::User);
        }
        ctx
    }

    /// Check register access policy and start the always-on jobs
    pub fn initialize(&self) -> Result<()> {
        self.initialize_with_policy(system::register_access_blocked())
    }

    /// `initialize` with the register access policy supplied by the caller
    ///
    /// A blocked policy on Intel stops the CPU limit job and the processor
    /// driver and returns `InitializationBlocked`; the other jobs keep running.
    pub fn initialize_with_policy(&self, register_access_blocked: bool) -> Result<()> {
        self.job(JobKind::PowerScheme).start();
        self.job(JobKind::TelemetrySensor).start();

        if !self.hardware.processor.is_initialized() {
            warn!("Processor driver not initialized, TDP control unavailable");
            return Ok(());
        }

        if self.hardware.processor.kind() == ProcessorKind::Intel && register_access_blocked {
            self.job(JobKind::CpuLimit).stop();
            self.hardware.processor.stop();
            self.tdp_enabled.store(false, Ordering::Release);
            let err = FramegovError::InitializationBlocked(
                "kernel lockdown forbids MSR access, TDP read/write is disabled".to_string(),
            );
            error!("{}", err);
            return Err(err);
        }

        info!(
            "Governor initialized ({:?} processor, cpu-limit every {} ms)",
            self.hardware.processor.kind(),
            self.cpu_default_interval_ms
        );
        Ok(())
    }

    pub fn settings(&self) -> &GovernorSettings {
        &self.settings
    }

    pub fn processor(&self) -> &Arc<dyn Processor> {
        &self.hardware.processor
    }

    pub fn readback(&self) -> &HardwareReadback {
        &self.hardware.readback
    }

    pub fn signals(&self) -> &TelemetrySignals {
        &self.signals
    }

    pub fn requests(&self) -> &TdpRequests {
        &self.requests
    }

    pub fn job(&self, kind: JobKind) -> &WatchdogJob {
        &self.jobs[kind.index()]
    }

    pub fn jobs(&self) -> &[WatchdogJob] {
        &self.jobs
    }

    pub fn is_tdp_enabled(&self) -> bool {
        self.tdp_enabled.load(Ordering::Acquire)
    }

    /// Latest AutoTDP setpoint, if the controller produced one
    pub fn setpoint(&self) -> Option<f64> {
        self.setpoint.get()
    }

    /// Controller state; blocks briefly if an AutoTDP tick is running
    pub fn controller_state(&self) -> ControllerState {
        self.auto_tdp.enter().state()
    }

    /// Direct access to the telemetry domain (blocks while a sensor tick runs)
    pub fn with_telemetry<R>(&self, f: impl FnOnce(&mut TelemetryState) -> R) -> R {
        f(&mut self.telemetry.enter())
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Request a limit on one firmware rail
    ///
    /// `User` requests also become the fallback and the baseline; `Profile`
    /// requests become the baseline; `Controller` requests are only enforced.
    pub fn request_tdp(&self, rail: PowerRail, watts: f64, origin: RequestOrigin) -> Result<()> {
        if !PowerRail::REQUESTED.contains(&rail) {
            return Err(FramegovError::NotSupported(format!(
                "{:?} is derived from the Slow/Fast requests",
                rail
            )));
        }
        if !watts.is_finite() || watts < 0.0 {
            return Err(FramegovError::invalid_config(
                "tdp",
                format!("{} W is not a usable limit", watts),
            ));
        }
        self.requests.record(rail.index(), watts, origin);
        debug!(rail = ?rail, watts, origin = ?origin, "TDP requested");
        Ok(())
    }

    /// Request all three firmware rails at once, in Slow, Stapm, Fast order
    pub fn request_tdp_all(&self, watts: [f64; 3], origin: RequestOrigin) -> Result<()> {
        for (rail, value) in PowerRail::REQUESTED.into_iter().zip(watts) {
            self.request_tdp(rail, value, origin)?;
        }
        Ok(())
    }

    pub fn request_gpu_clock(&self, mhz: f64, origin: RequestOrigin) {
        if origin == RequestOrigin::User {
            self.fallback_gfx_clock.publish(mhz);
        }
        self.stored_gfx_clock.publish(mhz);
        debug!(mhz, origin = ?origin, "GPU clock requested");
    }

    /// Request one of [`PowerScheme::ALL`] by index and apply it right away
    pub fn request_power_scheme(&self, idx: usize) -> Result<()> {
        let scheme = PowerScheme::from_index(idx).ok_or_else(|| {
            FramegovError::PowerScheme(format!("No power scheme at index {}", idx))
        })?;
        *self.requested_scheme.lock() = Some(scheme);
        info!("User requested power scheme: {} ({:?})", scheme.guid(), scheme);
        self.hardware.power.set_active(scheme)
    }

    pub fn requested_power_scheme(&self) -> Option<PowerScheme> {
        *self.requested_scheme.lock()
    }

    // ========================================================================
    // Profiles
    // ========================================================================

    /// A profile became active (or the active profile changed)
    pub fn apply_profile(&self, profile: &Profile) -> Result<()> {
        if profile.tdp_override && !self.settings.tdp_watchdog_enabled {
            self.start_cpu_limit();
        }

        match (profile.tdp_override, profile.tdp_value) {
            (true, Some(values)) => self.request_tdp_all(values, RequestOrigin::Profile)?,
            _ => self.restore_fallback()?,
        }

        if let Some(app) = profile.application.as_deref() {
            self.load_curve_for(app)?;
        }
        info!("Profile '{}' applied", profile.name);
        Ok(())
    }

    /// The active profile went away
    pub fn discard_profile(&self, profile: &Profile) -> Result<()> {
        self.restore_fallback()?;
        if profile.tdp_override && !self.settings.tdp_watchdog_enabled {
            self.stop_cpu_limit();
        }
        info!("Profile '{}' discarded", profile.name);
        Ok(())
    }

    fn restore_fallback(&self) -> Result<()> {
        for (rail, watts) in PowerRail::REQUESTED.into_iter().zip(self.requests.fallback()) {
            if let Some(watts) = watts {
                self.request_tdp(rail, watts, RequestOrigin::Profile)?;
            }
        }
        Ok(())
    }

    /// Re-enforce the last user/profile limits (AutoTDP handing back control)
    pub(crate) fn restore_baseline(&self) {
        for (rail, watts) in PowerRail::REQUESTED.into_iter().zip(self.requests.baseline()) {
            if let Some(watts) = watts {
                self.requests.record(rail.index(), watts, RequestOrigin::Controller);
            }
        }
    }

    // ========================================================================
    // Jobs
    // ========================================================================

    pub fn start_cpu_limit(&self) {
        self.job(JobKind::CpuLimit).start();
    }

    /// Deferred: the job halts once every rail matches its request
    pub fn stop_cpu_limit(&self) {
        self.job(JobKind::CpuLimit).request_stop();
    }

    pub fn start_gpu_clock(&self) {
        self.job(JobKind::GpuClock).start();
    }

    /// Deferred: the job halts once the clock matches its request
    pub fn stop_gpu_clock(&self) {
        self.job(JobKind::GpuClock).request_stop();
    }

    pub fn start_power_scheme(&self) {
        self.job(JobKind::PowerScheme).start();
    }

    pub fn stop_power_scheme(&self) {
        self.job(JobKind::PowerScheme).stop();
    }

    pub fn start_telemetry(&self) {
        self.job(JobKind::TelemetrySensor).start();
    }

    pub fn stop_telemetry(&self) {
        self.job(JobKind::TelemetrySensor).stop();
    }

    /// Start AutoTDP; the CPU limit job runs alongside to enforce its output
    pub fn start_auto_tdp(&self) {
        self.auto_tdp_stop.store(false, Ordering::Release);
        self.start_cpu_limit();
        self.job(JobKind::AutoTdp).start();
    }

    /// Ask AutoTDP to stop; its next tick returns the controller to Idle
    pub fn stop_auto_tdp(&self) {
        if self.job(JobKind::AutoTdp).is_running() {
            self.auto_tdp_stop.store(true, Ordering::Release);
        }
    }

    /// Halt every job immediately (shutdown)
    pub fn stop_all(&self) {
        for job in &self.jobs {
            job.stop();
        }
    }

    // ========================================================================
    // Controller inputs
    // ========================================================================

    pub fn set_fps_target(&self, fps: f64) -> Result<()> {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(FramegovError::invalid_config(
                "auto_tdp_fps_target",
                format!("{} is not a usable frame rate", fps),
            ));
        }
        self.fps_target.publish(fps);
        Ok(())
    }

    pub fn fps_target(&self) -> f64 {
        self.fps_target.get_or_zero()
    }

    pub fn set_curve_store(&self, store: CurveStore) {
        *self.curves.write() = store;
    }

    /// Install the stored curve for `app`, or the baseline curve
    pub fn load_curve_for(&self, app: &str) -> Result<()> {
        let nodes = self.curves.read().nodes_for(Some(app));
        let curve = PerformanceCurve::new(nodes)?;
        self.auto_tdp.enter().set_curve(curve);
        *self.application.lock() = Some(app.to_string());
        info!("Performance curve loaded for '{}'", app);
        Ok(())
    }

    /// Snapshot of the stored curves, including ones calibrated this session
    pub fn curve_store(&self) -> CurveStore {
        self.curves.read().clone()
    }

    /// Keep `curve` as the loaded application's stored curve
    ///
    /// Returns false when no application is loaded or nothing changed.
    pub(crate) fn remember_curve(&self, curve: &PerformanceCurve) -> Result<bool> {
        let Some(app) = self.application.lock().clone() else {
            return Ok(false);
        };
        let mut store = self.curves.write();
        if store.nodes_for(Some(&app)) == curve.nodes() {
            return Ok(false);
        }
        store.upsert(&app, curve.nodes().to_vec())?;
        info!("Calibrated performance curve kept for '{}'", app);
        Ok(true)
    }

    /// Store the controller's current curve (blocks while an AutoTDP tick runs)
    pub fn remember_calibrated_curve(&self) -> Result<bool> {
        let curve = self.curve();
        self.remember_curve(&curve)
    }

    /// Current curve of the controller (blocks while an AutoTDP tick runs)
    pub fn curve(&self) -> PerformanceCurve {
        self.auto_tdp.enter().curve().clone()
    }

    // ========================================================================
    // Read-back callbacks from the processor driver
    // ========================================================================

    pub fn on_limit_changed(&self, rail: PowerRail, watts: f64) {
        self.hardware.readback.set_limit(rail, watts);
    }

    pub fn on_gfx_clock_changed(&self, mhz: f64) {
        self.hardware.readback.set_gfx_clock(mhz);
    }
}
