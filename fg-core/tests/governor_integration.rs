/*
 * Integration tests for framegov
 *
 * These tests drive the governor through its public API: telemetry published
 * into an in-memory region, watchdog ticks run by hand, hardware writes
 * observed through the dry-run processor's read-back.
 */

use fg_core::data::{
    get_curves_path, get_settings_path, load_curves, load_settings_from, save_curves,
    CurveNode, CurveStore, GovernorSettings, PowerRail,
};
use fg_core::engine::{BiasEstimator, ControllerState, PerformanceCurve};
use fg_core::governor::{run_tick, GovernorContext, Hardware, JobKind, SkipReason, TickOutcome};
use fg_core::hw::{DryRunProcessor, HardwareReadback, MemoryPowerScheme, ProcessorKind};
use fg_core::telemetry::layout::encode::{region, GroupSpec};
use fg_core::telemetry::{ChannelEvent, MemoryOpener, SignalSources, TelemetryChannel};
use serial_test::serial;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

const SHM: &str = "HWiNFO_SENS_SM2";
const CPU_GROUP: &str = "CPU [#0]: AMD Ryzen Z1 Extreme: Enhanced";

// Test utilities
fn scenario_nodes() -> Vec<CurveNode> {
    vec![
        CurveNode::new(5.0, 15.0),
        CurveNode::new(10.0, 54.0),
        CurveNode::new(15.0, 74.0),
        CurveNode::new(20.0, 80.0),
        CurveNode::new(25.0, 84.0),
    ]
}

fn publish(opener: &MemoryOpener, fps: f64, watts: f64) {
    opener.publish(
        SHM,
        region(&[
            GroupSpec::new("System: ASUS ROG Ally", &[("Virtual Memory Load", 41.0)]),
            GroupSpec::new(CPU_GROUP, &[("CPU Package Power", watts), ("CPU Core Power", 9.0)]),
            GroupSpec::new("RTSS", &[("Framerate", fps), ("Frame Time", 1000.0 / fps)]),
        ]),
    );
}

fn governor(opener: &MemoryOpener) -> Arc<GovernorContext> {
    let readback = Arc::new(HardwareReadback::new());
    let hardware = Hardware {
        processor: Arc::new(DryRunProcessor::new(ProcessorKind::Amd, readback.clone())),
        power: Arc::new(MemoryPowerScheme::default()),
        readback,
    };
    let channel = TelemetryChannel::new(Arc::new(opener.clone()), SHM);
    let sources = SignalSources {
        overlay_group: "RTSS".to_string(),
        cpu_group: CPU_GROUP.to_string(),
    };
    Arc::new(GovernorContext::with_sources(
        GovernorSettings::default(),
        hardware,
        channel,
        sources,
    ))
}

#[test]
fn test_scenario_curve_bias() {
    let mut curve = PerformanceCurve::new(scenario_nodes()).unwrap();
    // between the 10 W/54 fps and 15 W/74 fps nodes
    assert!((curve.required_tdp(60.0) - 11.5).abs() < 1e-9);

    // the game runs slower than the curve predicts: 56.24 fps at 15 W
    let bias = BiasEstimator::new(5.0, 25.0).compute_bias(&mut curve, 60.0, 56.24, 15.0);
    assert!((bias - 18.3).abs() < 0.05, "bias = {}", bias);
    assert!(bias > 15.0 && bias < 20.0);
}

#[test]
fn test_telemetry_to_hardware_pipeline() {
    let opener = MemoryOpener::new();
    publish(&opener, 50.0, 15.0);
    let ctx = governor(&opener);
    let events = ctx.with_telemetry(|t| t.channel.subscribe());
    ctx.initialize_with_policy(false).unwrap();
    ctx.set_fps_target(60.0).unwrap();
    ctx.start_auto_tdp();

    // first sensor tick checks the connection and polls
    assert_eq!(run_tick(&ctx, JobKind::TelemetrySensor), TickOutcome::Completed);
    assert_eq!(events.try_recv().unwrap(), ChannelEvent::Connected);
    let signals = ctx.signals().snapshot();
    assert_eq!(signals.framerate, Some(50.0));
    assert_eq!(signals.package_power_watts, Some(15.0));
    assert!((signals.frame_time_ms.unwrap() - 20.0).abs() < 1e-9);

    // seed from package power
    assert_eq!(run_tick(&ctx, JobKind::AutoTdp), TickOutcome::Completed);
    assert_eq!(ctx.setpoint(), Some(15.0));

    // 50 fps is 16.7% short of the target: a bias attempt raises the limit
    assert_eq!(run_tick(&ctx, JobKind::AutoTdp), TickOutcome::Completed);
    let setpoint = ctx.setpoint().unwrap();
    assert!(setpoint > 15.0 && setpoint <= 25.0, "setpoint = {}", setpoint);
    assert_eq!(ctx.controller_state(), ControllerState::BiasCalibration);

    run_tick(&ctx, JobKind::CpuLimit);
    for rail in [PowerRail::Slow, PowerRail::Stapm, PowerRail::Fast] {
        assert_eq!(ctx.readback().limit(rail), setpoint);
    }
    assert_eq!(run_tick(&ctx, JobKind::CpuLimit), TickOutcome::Converged);
}

#[test]
fn test_busy_telemetry_domain_drops_tick() {
    let opener = MemoryOpener::new();
    publish(&opener, 60.0, 12.0);
    let ctx = governor(&opener);

    let outcome = ctx.with_telemetry(|_| run_tick(&ctx, JobKind::TelemetrySensor));
    assert_eq!(outcome, TickOutcome::Skipped(SkipReason::DomainBusy));
    assert_eq!(ctx.signals().snapshot().framerate, None);

    assert_eq!(run_tick(&ctx, JobKind::TelemetrySensor), TickOutcome::Completed);
    assert_eq!(ctx.signals().snapshot().framerate, Some(60.0));
}

#[test]
fn test_missing_signal_clears_published_value() {
    let opener = MemoryOpener::new();
    opener.publish(
        SHM,
        region(&[GroupSpec::new("RTSS", &[("Framerate", 60.0)])]),
    );
    let ctx = governor(&opener);
    ctx.start_auto_tdp();

    assert_eq!(run_tick(&ctx, JobKind::TelemetrySensor), TickOutcome::Completed);
    assert_eq!(ctx.signals().snapshot().package_power_watts, None);

    // no package power: the controller holds in Idle
    assert!(matches!(
        run_tick(&ctx, JobKind::AutoTdp),
        TickOutcome::Skipped(SkipReason::NotReady(_))
    ));
    assert_eq!(ctx.controller_state(), ControllerState::Idle);
    assert_eq!(ctx.setpoint(), None);
}

#[test]
fn test_settings_partial_file_and_validation() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.json");

    fs::write(&path, r#"{ "auto_tdp_fps_target": 45.0, "control": { "max_tdp_watts": 18.0 } }"#)
        .unwrap();
    let settings = load_settings_from(&path).unwrap();
    assert_eq!(settings.auto_tdp_fps_target, 45.0);
    assert_eq!(settings.control.max_tdp_watts, 18.0);
    assert_eq!(settings.control.min_tdp_watts, 5.0);
    assert_eq!(settings.intervals.auto_tdp_ms, 100);

    fs::write(&path, r#"{ "control": { "min_tdp_watts": 20.0, "max_tdp_watts": 10.0 } }"#).unwrap();
    assert!(load_settings_from(&path).is_err());

    assert!(load_settings_from(&dir.path().join("missing.json")).is_ok());
}

#[test]
#[serial]
fn test_curve_store_in_config_dir_selects_curve() {
    let dir = TempDir::new().unwrap();
    std::env::set_var("XDG_CONFIG_HOME", dir.path());

    assert!(get_settings_path().starts_with(dir.path()));
    assert!(get_curves_path().starts_with(dir.path()));

    let mut store = CurveStore::new();
    store.upsert("Ghostrunner", scenario_nodes()).unwrap();
    save_curves(&store).unwrap();

    let loaded = load_curves().unwrap();
    assert_eq!(loaded.get("Ghostrunner").map(|n| n.len()), Some(5));

    let opener = MemoryOpener::new();
    let ctx = governor(&opener);
    ctx.set_curve_store(loaded);

    ctx.load_curve_for("Ghostrunner").unwrap();
    assert_eq!(ctx.curve().nodes().len(), 5);
    assert!((ctx.curve().required_tdp(60.0) - 11.5).abs() < 1e-9);

    // unknown applications fall back to the baseline curve
    ctx.load_curve_for("Unknown Game").unwrap();
    assert_eq!(ctx.curve().nodes().len(), 21);

    std::env::remove_var("XDG_CONFIG_HOME");
}
