//! System information gathering
//!
//! Linux only: CPU identity from /proc/cpuinfo, register access policy from
//! the kernel lockdown file.

use std::fs;
use std::sync::OnceLock;

use tracing::debug;

use crate::constants::paths;
use crate::hw::ProcessorKind;

/// CPU identity never changes while we run; read /proc/cpuinfo once
static CACHED_CPU_INFO: OnceLock<CpuInfo> = OnceLock::new();

/// Vendor and model as reported by the kernel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuInfo {
    pub vendor_id: String,
    pub model_name: String,
}

impl CpuInfo {
    /// Parse the first processor block of /proc/cpuinfo
    pub fn parse(cpuinfo: &str) -> Self {
        let mut info = CpuInfo::default();
        for line in cpuinfo.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();
            if key == "vendor_id" && info.vendor_id.is_empty() {
                info.vendor_id = value.to_string();
            } else if key == "model name" && info.model_name.is_empty() {
                info.model_name = value.to_string();
            }
            if !info.vendor_id.is_empty() && !info.model_name.is_empty() {
                break;
            }
        }
        info
    }

    pub fn kind(&self) -> ProcessorKind {
        ProcessorKind::from_vendor_id(&self.vendor_id)
    }
}

fn get_cached_cpu_info() -> &'static CpuInfo {
    CACHED_CPU_INFO.get_or_init(|| match fs::read_to_string(paths::CPUINFO) {
        Ok(contents) => CpuInfo::parse(&contents),
        Err(e) => {
            debug!("Failed to read {}: {}", paths::CPUINFO, e);
            CpuInfo::default()
        }
    })
}

/// CPU model name (cached), "Unknown CPU" when unavailable
pub fn cpu_model() -> String {
    let model = &get_cached_cpu_info().model_name;
    if model.is_empty() {
        "Unknown CPU".to_string()
    } else {
        model.clone()
    }
}

/// Processor vendor of the running machine (cached)
pub fn processor_kind() -> ProcessorKind {
    get_cached_cpu_info().kind()
}

// ============================================================================
// Register Access Policy
// ============================================================================

/// True when the lockdown file selects a mode that forbids MSR writes
///
/// The file lists all modes with the active one in brackets, e.g.
/// `none [integrity] confidentiality`.
pub fn lockdown_forbids_registers(lockdown: &str) -> bool {
    lockdown.contains("[integrity]") || lockdown.contains("[confidentiality]")
}

/// Check whether the platform security policy blocks low-level register access
pub fn register_access_blocked() -> bool {
    match fs::read_to_string(paths::KERNEL_LOCKDOWN) {
        Ok(contents) => lockdown_forbids_registers(&contents),
        // No securityfs or no lockdown LSM: nothing is blocking us
        Err(_) => false,
    }
}

/// Check if the process is running with root privileges
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AMD_CPUINFO: &str = "processor\t: 0\n\
vendor_id\t: AuthenticAMD\n\
cpu family\t: 25\n\
model name\t: AMD Ryzen Z1 Extreme\n\
\n\
processor\t: 1\n\
vendor_id\t: AuthenticAMD\n\
model name\t: AMD Ryzen Z1 Extreme\n";

    #[test]
    fn test_parse_cpuinfo() {
        let info = CpuInfo::parse(AMD_CPUINFO);
        assert_eq!(info.vendor_id, "AuthenticAMD");
        assert_eq!(info.model_name, "AMD Ryzen Z1 Extreme");
        assert_eq!(info.kind(), ProcessorKind::Amd);
    }

    #[test]
    fn test_parse_cpuinfo_missing_fields() {
        let info = CpuInfo::parse("processor : 0\nflags : fpu vme\n");
        assert_eq!(info, CpuInfo::default());
        assert_eq!(info.kind(), ProcessorKind::Unknown);
    }

    #[test]
    fn test_lockdown_modes() {
        assert!(!lockdown_forbids_registers("[none] integrity confidentiality\n"));
        assert!(lockdown_forbids_registers("none [integrity] confidentiality\n"));
        assert!(lockdown_forbids_registers("none integrity [confidentiality]\n"));
        assert!(!lockdown_forbids_registers(""));
    }
}
