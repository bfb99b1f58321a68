//! # Compute Device Detection
//!
//! Picks the candle device the engine's tensor work runs on and reports GPU availability to
//! `/health`. Probing a GPU backend can be slow, so detection happens once per process.

use candle_core::Device;
use serde::Serialize;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Best available device, detected on first use.
static BEST_DEVICE: OnceLock<Device> = OnceLock::new();

/// Availability of each GPU backend, probed on first use.
static GPU_PROBE: OnceLock<GpuProbe> = OnceLock::new();

#[derive(Debug, Clone, Copy)]
struct GpuProbe {
    cuda: bool,
    metal: bool,
}

/// Value of `engine.device`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    /// CUDA device 0, CPU if unavailable
    Cuda,
    /// Metal device 0, CPU if unavailable
    Metal,
}

impl std::str::FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" | "" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "metal" => Ok(DevicePreference::Metal),
            _ => Err(format!("Unknown device preference: {}", s)),
        }
    }
}

pub struct DeviceManager;

impl DeviceManager {
    pub fn get_device(preference: DevicePreference) -> Device {
        match preference {
            DevicePreference::Auto => Self::get_best_device(),
            DevicePreference::Cpu => Device::Cpu,
            DevicePreference::Cuda => Self::cuda_device().unwrap_or(Device::Cpu),
            DevicePreference::Metal => Self::metal_device().unwrap_or(Device::Cpu),
        }
    }

    pub fn get_best_device() -> Device {
        BEST_DEVICE.get_or_init(Self::detect_best_device).clone()
    }

    fn detect_best_device() -> Device {
        debug!("Detecting compute device for expression inference");

        if let Some(device) = Self::cuda_device() {
            info!("Selected CUDA GPU for expression inference");
            return device;
        }
        if let Some(device) = Self::metal_device() {
            info!("Selected Metal GPU for expression inference");
            return device;
        }

        info!("Using CPU for expression inference");
        Device::Cpu
    }

    fn cuda_device() -> Option<Device> {
        Device::new_cuda(0)
            .map_err(|e| debug!("CUDA not available: {}", e))
            .ok()
    }

    fn metal_device() -> Option<Device> {
        Device::new_metal(0)
            .map_err(|e| debug!("Metal not available: {}", e))
            .ok()
    }

    fn probe() -> GpuProbe {
        *GPU_PROBE.get_or_init(|| GpuProbe {
            cuda: Self::cuda_device().is_some(),
            metal: Self::metal_device().is_some(),
        })
    }

    pub fn is_gpu_available() -> bool {
        let probe = Self::probe();
        probe.cuda || probe.metal
    }

    pub fn get_device_info(device: &Device) -> String {
        match device {
            Device::Cpu => "CPU".to_string(),
            Device::Cuda(_) => "CUDA GPU".to_string(),
            Device::Metal(_) => "Metal GPU".to_string(),
        }
    }

    /// Summary reported by `/health`.
    pub fn get_device_summary() -> DeviceSummary {
        let probe = Self::probe();
        DeviceSummary {
            cuda_available: probe.cuda,
            metal_available: probe.metal,
            gpu_available: probe.cuda || probe.metal,
            best_device: Self::get_device_info(&Self::get_best_device()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub cuda_available: bool,
    pub metal_available: bool,
    pub gpu_available: bool,
    pub best_device: String,
}

/// Device for an `engine.device` string; unknown values fall back to auto-detection.
pub fn create_device_from_string(device_str: &str) -> Device {
    match device_str.parse::<DevicePreference>() {
        Ok(preference) => DeviceManager::get_device(preference),
        Err(_) => {
            warn!("Invalid device preference '{}', using auto", device_str);
            DeviceManager::get_best_device()
        }
    }
}
