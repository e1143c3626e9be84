//! Device and precision selection

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::warn;

/// Execution device for the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[serde(alias = "cuda", alias = "accelerated")]
    Gpu,
    Cpu,
}

impl Default for Device {
    fn default() -> Self {
        Self::Gpu
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpu => f.write_str("gpu"),
            Self::Cpu => f.write_str("cpu"),
        }
    }
}

/// Numeric precision of the loaded weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Fp16,
    Fp32,
}

impl Precision {
    /// Half precision on accelerators, full precision on CPU
    pub fn for_device(device: Device) -> Self {
        match device {
            Device::Gpu => Self::Fp16,
            Device::Cpu => Self::Fp32,
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fp16 => f.write_str("fp16"),
            Self::Fp32 => f.write_str("fp32"),
        }
    }
}

/// Reports whether an accelerator is usable in this process
pub trait AcceleratorProbe: Send + Sync {
    fn accelerator_available(&self) -> bool;
}

/// Probe backed by the host's NVIDIA driver files
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl AcceleratorProbe for SystemProbe {
    fn accelerator_available(&self) -> bool {
        if let Ok(visible) = std::env::var("CUDA_VISIBLE_DEVICES") {
            let visible = visible.trim();
            if visible.is_empty() || visible == "-1" {
                return false;
            }
        }

        Path::new("/proc/driver/nvidia/version").exists() || Path::new("/dev/nvidia0").exists()
    }
}

/// Probe with a fixed answer
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe(pub bool);

impl AcceleratorProbe for StaticProbe {
    fn accelerator_available(&self) -> bool {
        self.0
    }
}

/// Resolve the device and precision to load with.
///
/// A GPU request on a host without an accelerator is downgraded to CPU with
/// full precision.
pub fn select_device(requested: Device, probe: &dyn AcceleratorProbe) -> (Device, Precision) {
    let device = match requested {
        Device::Gpu if !probe.accelerator_available() => {
            warn!(
                requested = %requested,
                selected = %Device::Cpu,
                precision = %Precision::Fp32,
                "Accelerator requested but not available; falling back to CPU"
            );
            Device::Cpu
        }
        other => other,
    };

    (device, Precision::for_device(device))
}
