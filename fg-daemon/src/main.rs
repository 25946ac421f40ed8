//! Framegov Daemon (framegovd)
//!
//! Runs the five watchdog jobs against the local machine:
//! power scheme sync, CPU limit and GPU clock reconciliation, telemetry
//! polling and the AutoTDP controller.
//!
//! # Hardware Writes
//! Power limits go to a logging dry-run processor that reports every write
//! back as applied. A vendor driver plugs in through `fg_core::Processor`.
//!
//! # Signals
//! SIGINT/SIGTERM stop all jobs and exit cleanly.

mod watchdog;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use fg_core::data::{load_curves, load_settings, load_settings_from, save_curves, GovernorSettings};
use fg_core::governor::{GovernorContext, Hardware};
use fg_core::hw::{
    DryRunProcessor, HardwareReadback, MemoryPowerScheme, PlatformProfileControl,
    PowerSchemeControl,
};
use fg_core::telemetry::{ShmOpener, TelemetryChannel};
use fg_core::system;
use fg_error::FramegovError;
use tracing::{info, warn};

use crate::watchdog::WatchdogScheduler;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "framegovd")]
#[command(version)]
#[command(about = "Framegov - frame-rate driven TDP governor")]
#[command(long_about = "Framegov - frame-rate driven TDP governor

Reads frame rate and package power from the monitoring application's shared
memory and keeps CPU power limits, GPU clock and the power scheme where they
were requested. With --auto-tdp the power limit follows the frame rate target.

ENVIRONMENT VARIABLES:
    FRAMEGOV_LOG=debug     Log level / filter (default: info)
    XDG_CONFIG_HOME        Base directory for settings.json and curves.json

FILES:
    ~/.config/framegov/settings.json      Governor settings
    ~/.config/framegov/curves.json        Per-application performance curves")]
struct Cli {
    /// Settings file (default: ~/.config/framegov/settings.json)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory holding the telemetry shared memory object
    #[arg(long, value_name = "DIR")]
    shm_dir: Option<PathBuf>,

    /// AutoTDP frame rate target (overrides the settings file)
    #[arg(long, value_name = "FPS")]
    fps_target: Option<f64>,

    /// Start the AutoTDP controller right away
    #[arg(long)]
    auto_tdp: bool,

    /// Application whose performance curve should be loaded
    #[arg(long, value_name = "NAME")]
    app: Option<String>,
}

/// Install journald logging when the journal socket exists, else stdout
fn init_logging(log_level: &str) -> bool {
    let use_journald = Path::new("/run/systemd/journal/socket").exists();

    if use_journald {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(log_level))
                    .init();
                return true;
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(log_level)
        .init();
    false
}

fn load_governor_settings(cli: &Cli) -> anyhow::Result<GovernorSettings> {
    let mut settings = match &cli.config {
        Some(path) => load_settings_from(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => load_settings().context("loading settings")?,
    };
    if let Some(dir) = &cli.shm_dir {
        settings.telemetry.shm_dir = dir.clone();
    }
    Ok(settings)
}

fn power_scheme_control() -> Arc<dyn PowerSchemeControl> {
    match PlatformProfileControl::system() {
        Some(control) => {
            info!("STARTUP: Power scheme via {}", control.path().display());
            Arc::new(control)
        }
        None => {
            warn!("STARTUP: No ACPI platform profile, power scheme requests are kept in memory");
            Arc::new(MemoryPowerScheme::default())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // PHASE 0: Log panics before they unwind out of a task
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        eprintln!("PANIC at {}: {}", location, message);
    }));

    // PHASE 1: Arguments and logging
    let cli = Cli::parse();
    let log_level = std::env::var("FRAMEGOV_LOG").unwrap_or_else(|_| "info".to_string());
    let use_journald = init_logging(&log_level);

    info!("STARTUP: framegovd {} starting", VERSION);
    info!("STARTUP: Logging to {}", if use_journald { "systemd journal" } else { "stdout" });
    info!("STARTUP: CPU: {} ({:?})", system::cpu_model(), system::processor_kind());
    if !system::is_root() {
        warn!("STARTUP: Not running as root, power scheme writes will likely fail");
    }

    // PHASE 2: Settings and collaborators
    let settings = load_governor_settings(&cli)?;
    let readback = Arc::new(HardwareReadback::new());
    let hardware = Hardware {
        processor: Arc::new(DryRunProcessor::new(system::processor_kind(), readback.clone())),
        power: power_scheme_control(),
        readback,
    };
    let opener = Arc::new(ShmOpener::new(settings.telemetry.shm_dir.clone()));
    let channel = TelemetryChannel::new(opener, settings.telemetry.shared_memory_name.clone());
    info!(
        "STARTUP: Telemetry from {}/{}",
        settings.telemetry.shm_dir.display(),
        settings.telemetry.shared_memory_name
    );

    let ctx = Arc::new(GovernorContext::new(settings, hardware, channel)?);

    // an unreadable curves file is never overwritten
    let stored_curves = match load_curves() {
        Ok(store) => {
            info!("STARTUP: {} stored performance curves", store.len());
            ctx.set_curve_store(store.clone());
            Some(store)
        }
        Err(e) => {
            warn!("STARTUP: Could not load performance curves: {}", e);
            None
        }
    };

    // PHASE 3: Initialize; a blocked TDP subsystem is not fatal
    match ctx.initialize() {
        Ok(()) => {}
        Err(FramegovError::InitializationBlocked(reason)) => {
            warn!("STARTUP: TDP control disabled: {}", reason);
        }
        Err(e) => return Err(e).context("initializing governor"),
    }

    if let Some(app) = &cli.app {
        ctx.load_curve_for(app)
            .with_context(|| format!("loading performance curve for {}", app))?;
    }
    if let Some(fps) = cli.fps_target {
        ctx.set_fps_target(fps)?;
    }
    if cli.auto_tdp {
        if ctx.is_tdp_enabled() {
            info!("STARTUP: AutoTDP targeting {} fps", ctx.fps_target());
            ctx.start_auto_tdp();
        } else {
            warn!("STARTUP: --auto-tdp ignored, TDP control is disabled");
        }
    }

    // PHASE 4: Signals
    let scheduler = WatchdogScheduler::new(ctx.clone());
    let shutdown = scheduler.shutdown_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("SIGNAL: Received SIGINT/SIGTERM - initiating shutdown");
        shutdown.shutdown();
    }) {
        warn!("Failed to set signal handler: {}. Shutdown via signals may not work cleanly.", e);
    }

    info!("STARTUP: PID: {}", std::process::id());
    info!("STARTUP: Log level: {}", log_level);

    // PHASE 5: Run until shutdown
    scheduler.run().await;

    if ctx.setpoint().is_some() {
        warn!("SHUTDOWN: AutoTDP was still active, last setpoint left in place");
    }
    if let Err(e) = ctx.remember_calibrated_curve() {
        warn!("SHUTDOWN: Calibrated curve not kept: {}", e);
    }
    let curves = ctx.curve_store();
    if stored_curves.is_some_and(|stored| stored != curves) {
        match save_curves(&curves) {
            Ok(()) => info!("SHUTDOWN: Saved {} performance curves", curves.len()),
            Err(e) => warn!("SHUTDOWN: Could not save performance curves: {}", e),
        }
    }
    info!("SHUTDOWN: framegovd terminated gracefully");
    Ok(())
}
