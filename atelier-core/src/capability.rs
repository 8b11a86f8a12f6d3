use anyhow::{anyhow, Context, Result};
use candle_core::utils::{cuda_is_available, metal_is_available};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Fraction of unified memory treated as usable by the accelerator. There is
/// no separate VRAM pool on those machines, so this is an estimate.
pub const UNIFIED_MEMORY_FRACTION: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AcceleratorKind {
    None,
    GenericGpu,
    UnifiedMemory,
}

serde_plain::derive_display_from_serialize!(AcceleratorKind);
serde_plain::derive_fromstr_from_deserialize!(AcceleratorKind);

/// Coarse hardware capability, probed once per process.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemCapability {
    pub kind: AcceleratorKind,
    pub total_memory_gb: f64,
    pub usable_memory_gb: f64,
}

impl SystemCapability {
    /// Probe the executing machine. This never fails: any probe error
    /// degrades to the CPU-only, zero-memory capability.
    pub fn detect() -> Self {
        match Self::probe() {
            Ok(capability) => {
                debug!(
                    kind = %capability.kind,
                    total_gb = capability.total_memory_gb,
                    usable_gb = capability.usable_memory_gb,
                    "detected system capability"
                );
                capability
            }
            Err(err) => {
                warn!("capability probe failed, assuming cpu-only: {err:#}");
                Self::cpu_only()
            }
        }
    }

    pub fn cpu_only() -> Self {
        SystemCapability {
            kind: AcceleratorKind::None,
            total_memory_gb: 0.0,
            usable_memory_gb: 0.0,
        }
    }

    /// Device string reported to callers, matching what the pipeline will
    /// actually run on.
    pub fn device_label(&self) -> &'static str {
        match self.kind {
            AcceleratorKind::UnifiedMemory => "metal",
            AcceleratorKind::GenericGpu => "cuda",
            AcceleratorKind::None => "cpu",
        }
    }

    fn probe() -> Result<Self> {
        let total_memory_gb = total_system_memory_gb()?;
        if metal_is_available() {
            Ok(SystemCapability {
                kind: AcceleratorKind::UnifiedMemory,
                total_memory_gb,
                usable_memory_gb: total_memory_gb * UNIFIED_MEMORY_FRACTION,
            })
        } else if cuda_is_available() {
            Ok(SystemCapability {
                kind: AcceleratorKind::GenericGpu,
                total_memory_gb,
                usable_memory_gb: discrete_vram_gb()?,
            })
        } else {
            Ok(SystemCapability {
                kind: AcceleratorKind::None,
                total_memory_gb,
                usable_memory_gb: 0.0,
            })
        }
    }
}

#[cfg(target_os = "linux")]
fn total_system_memory_gb() -> Result<f64> {
    let meminfo =
        std::fs::read_to_string("/proc/meminfo").context("failed to read /proc/meminfo")?;
    parse_meminfo_total_kb(&meminfo)
        .map(|kb| kb as f64 / (1024.0 * 1024.0))
        .ok_or_else(|| anyhow!("MemTotal not found in /proc/meminfo"))
}

#[cfg(target_os = "macos")]
fn total_system_memory_gb() -> Result<f64> {
    let output = std::process::Command::new("sysctl")
        .args(["-n", "hw.memsize"])
        .output()
        .context("failed to run sysctl")?;
    let text = String::from_utf8(output.stdout).context("sysctl output is not utf-8")?;
    parse_memsize_bytes(&text)
        .map(|bytes| bytes as f64 / (1024.0 * 1024.0 * 1024.0))
        .ok_or_else(|| anyhow!("could not parse hw.memsize"))
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn total_system_memory_gb() -> Result<f64> {
    Err(anyhow!("no memory probe for this platform"))
}

/// Total memory of the first discrete accelerator, as the driver reports it.
fn discrete_vram_gb() -> Result<f64> {
    let output = std::process::Command::new("nvidia-smi")
        .args(["--query-gpu=memory.total", "--format=csv,noheader,nounits"])
        .output()
        .context("failed to run nvidia-smi")?;
    let text = String::from_utf8(output.stdout).context("nvidia-smi output is not utf-8")?;
    parse_vram_total_mib(&text)
        .map(|mib| mib / 1024.0)
        .ok_or_else(|| anyhow!("could not parse nvidia-smi memory report"))
}

#[cfg(any(target_os = "linux", test))]
fn parse_meminfo_total_kb(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find(|line| line.starts_with("MemTotal:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|value| value.parse().ok())
}

#[cfg(any(target_os = "macos", test))]
fn parse_memsize_bytes(text: &str) -> Option<u64> {
    text.trim().parse().ok()
}

fn parse_vram_total_mib(text: &str) -> Option<f64> {
    text.lines().next().and_then(|line| line.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_never_fails() {
        // Whatever this host looks like, detection must produce a value with
        // consistent fields rather than propagate a probe failure.
        let capability = SystemCapability::detect();
        assert!(capability.total_memory_gb >= 0.0);
        assert!(capability.usable_memory_gb >= 0.0);
        if capability.kind == AcceleratorKind::None {
            assert_eq!(capability.usable_memory_gb, 0.0);
        }
    }

    #[test]
    fn degraded_capability_is_cpu_only_and_empty() {
        let capability = SystemCapability::cpu_only();
        assert_eq!(capability.kind, AcceleratorKind::None);
        assert_eq!(capability.usable_memory_gb, 0.0);
        assert_eq!(capability.device_label(), "cpu");
    }

    #[test]
    fn parses_proc_meminfo() {
        let meminfo = "MemTotal:       32718288 kB\nMemFree:        12345 kB\n";
        assert_eq!(parse_meminfo_total_kb(meminfo), Some(32_718_288));
        assert_eq!(parse_meminfo_total_kb("MemFree: 1 kB\n"), None);
    }

    #[test]
    fn parses_sysctl_memsize() {
        assert_eq!(parse_memsize_bytes("34359738368\n"), Some(34_359_738_368));
        assert_eq!(parse_memsize_bytes("garbage"), None);
    }

    #[test]
    fn parses_nvidia_smi_total() {
        assert_eq!(parse_vram_total_mib("24576\n"), Some(24576.0));
        // Multi-GPU hosts report one line per device; the first one wins.
        assert_eq!(parse_vram_total_mib("16384\n8192\n"), Some(16384.0));
        assert_eq!(parse_vram_total_mib(""), None);
    }

    #[test]
    fn unified_memory_estimate_uses_fixed_fraction() {
        let capability = SystemCapability {
            kind: AcceleratorKind::UnifiedMemory,
            total_memory_gb: 32.0,
            usable_memory_gb: 32.0 * UNIFIED_MEMORY_FRACTION,
        };
        assert_eq!(capability.usable_memory_gb, 19.2);
        assert_eq!(capability.device_label(), "metal");
    }

    #[test]
    fn kind_strings_match_contract() {
        assert_eq!(AcceleratorKind::None.to_string(), "none");
        assert_eq!(AcceleratorKind::GenericGpu.to_string(), "generic-gpu");
        assert_eq!(AcceleratorKind::UnifiedMemory.to_string(), "unified-memory");
    }
}
