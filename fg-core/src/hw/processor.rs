//! Processor power limit sink
//!
//! The vendor-specific driver that actually programs power limits lives
//! outside this crate. The governor only needs the `Processor` contract:
//! fire-and-forget writes, with confirmation arriving later through the
//! read-back values in [`HardwareReadback`].
//!
//! # Rails
//!
//! - `Slow`, `Stapm`, `Fast`: firmware-managed limits (AMD SMU, Intel RAPL)
//! - `MsrSlow`, `MsrFast`: Intel's register pair, written together with
//!   whole-watt values through [`Processor::set_msr_limit`]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::data::PowerRail;
use crate::error::{FramegovError, Result};
use crate::governor::PublishedValue;

/// CPU vendor, as far as power limit handling is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorKind {
    Amd,
    Intel,
    Unknown,
}

impl ProcessorKind {
    /// Map a /proc/cpuinfo `vendor_id`
    pub fn from_vendor_id(vendor_id: &str) -> Self {
        match vendor_id.trim() {
            "AuthenticAMD" => ProcessorKind::Amd,
            "GenuineIntel" => ProcessorKind::Intel,
            _ => ProcessorKind::Unknown,
        }
    }

    /// Intel exposes no STAPM rail
    pub fn has_rail(self, rail: PowerRail) -> bool {
        !(self == ProcessorKind::Intel && rail == PowerRail::Stapm)
    }

    /// Only Intel uses the MSR rail pair
    pub fn uses_msr(self) -> bool {
        self == ProcessorKind::Intel
    }
}

/// Power limit sink implemented by a vendor driver
pub trait Processor: Send + Sync {
    fn kind(&self) -> ProcessorKind;

    /// False until the driver is ready, and again after [`Processor::stop`]
    fn is_initialized(&self) -> bool;

    /// Request a limit on one firmware rail
    ///
    /// # Arguments
    /// * `rail` - One of `Slow`, `Stapm`, `Fast`
    /// * `watts` - Limit in watts
    fn set_tdp_limit(&self, rail: PowerRail, watts: f64) -> Result<()>;

    /// Request the Intel MSR limit pair in whole watts
    fn set_msr_limit(&self, slow_watts: i32, fast_watts: i32) -> Result<()>;

    /// Request a GPU clock in MHz
    fn set_gpu_clock(&self, mhz: f64) -> Result<()>;

    /// Release the driver; later writes are refused
    fn stop(&self);
}

/// Values the processor driver last reported as applied
///
/// Written by the driver's callbacks, read by the CPU limit and GPU clock
/// jobs. An absent value reads as 0, which the jobs treat as "not ready".
#[derive(Debug, Default)]
pub struct HardwareReadback {
    limits: [PublishedValue; 5],
    gfx_clock: PublishedValue,
}

impl HardwareReadback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_limit(&self, rail: PowerRail, watts: f64) {
        self.limits[rail.index()].publish(watts);
    }

    pub fn limit(&self, rail: PowerRail) -> f64 {
        self.limits[rail.index()].get_or_zero()
    }

    pub fn set_gfx_clock(&self, mhz: f64) {
        self.gfx_clock.publish(mhz);
    }

    pub fn gfx_clock(&self) -> f64 {
        self.gfx_clock.get_or_zero()
    }

    /// Forget everything (driver restarted)
    pub fn clear(&self) {
        for value in &self.limits {
            value.clear();
        }
        self.gfx_clock.clear();
    }
}

/// Processor that logs writes and reports them back as applied
///
/// Used by the daemon when no vendor driver is attached, and by tests.
pub struct DryRunProcessor {
    kind: ProcessorKind,
    initialized: AtomicBool,
    readback: Arc<HardwareReadback>,
}

impl DryRunProcessor {
    pub fn new(kind: ProcessorKind, readback: Arc<HardwareReadback>) -> Self {
        Self {
            kind,
            initialized: AtomicBool::new(true),
            readback,
        }
    }

    fn ensure_running(&self, target: &str) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(FramegovError::hardware_write(target, "processor stopped"))
        }
    }
}

impl Processor for DryRunProcessor {
    fn kind(&self) -> ProcessorKind {
        self.kind
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn set_tdp_limit(&self, rail: PowerRail, watts: f64) -> Result<()> {
        self.ensure_running("tdp")?;
        info!(rail = ?rail, watts, "dry-run: set TDP limit");
        self.readback.set_limit(rail, watts);
        Ok(())
    }

    fn set_msr_limit(&self, slow_watts: i32, fast_watts: i32) -> Result<()> {
        self.ensure_running("msr")?;
        info!(slow_watts, fast_watts, "dry-run: set MSR limit");
        self.readback.set_limit(PowerRail::MsrSlow, f64::from(slow_watts));
        self.readback.set_limit(PowerRail::MsrFast, f64::from(fast_watts));
        Ok(())
    }

    fn set_gpu_clock(&self, mhz: f64) -> Result<()> {
        self.ensure_running("gpu clock")?;
        info!(mhz, "dry-run: set GPU clock");
        self.readback.set_gfx_clock(mhz);
        Ok(())
    }

    fn stop(&self) {
        if self.initialized.swap(false, Ordering::AcqRel) {
            debug!("dry-run processor stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_vendor() {
        assert_eq!(ProcessorKind::from_vendor_id("AuthenticAMD"), ProcessorKind::Amd);
        assert_eq!(ProcessorKind::from_vendor_id("GenuineIntel\n"), ProcessorKind::Intel);
        assert_eq!(ProcessorKind::from_vendor_id("CentaurHauls"), ProcessorKind::Unknown);
    }

    #[test]
    fn test_rail_capabilities() {
        assert!(!ProcessorKind::Intel.has_rail(PowerRail::Stapm));
        assert!(ProcessorKind::Amd.has_rail(PowerRail::Stapm));
        assert!(ProcessorKind::Intel.uses_msr());
        assert!(!ProcessorKind::Amd.uses_msr());
    }

    #[test]
    fn test_dry_run_echoes_readback() {
        let readback = Arc::new(HardwareReadback::new());
        let cpu = DryRunProcessor::new(ProcessorKind::Intel, readback.clone());

        assert_eq!(readback.limit(PowerRail::Slow), 0.0);
        cpu.set_tdp_limit(PowerRail::Slow, 12.5).unwrap();
        cpu.set_msr_limit(12, 20).unwrap();
        cpu.set_gpu_clock(1600.0).unwrap();

        assert_eq!(readback.limit(PowerRail::Slow), 12.5);
        assert_eq!(readback.limit(PowerRail::MsrSlow), 12.0);
        assert_eq!(readback.limit(PowerRail::MsrFast), 20.0);
        assert_eq!(readback.gfx_clock(), 1600.0);

        readback.clear();
        assert_eq!(readback.limit(PowerRail::MsrFast), 0.0);
    }

    #[test]
    fn test_stopped_processor_refuses_writes() {
        let cpu = DryRunProcessor::new(ProcessorKind::Amd, Arc::new(HardwareReadback::new()));
        cpu.stop();
        assert!(!cpu.is_initialized());
        assert!(cpu.set_tdp_limit(PowerRail::Fast, 20.0).is_err());
    }
}
