//! Local accelerator inventory.

use std::process::Command;
use tracing::debug;

use zazu_types::{ConfigError, ZazuResult};

/// Environment variable that overrides device discovery with an explicit
/// comma-separated list of device ids.
pub const DEVICES_ENV: &str = "ZAZU_DEVICES";

/// The accelerators available to local trials, one trial per device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Accelerators {
    devices: Vec<String>,
}

impl Accelerators {
    pub fn new(devices: Vec<String>) -> Self {
        Self { devices }
    }

    pub fn none() -> Self {
        Self::default()
    }

    /// Discover local devices: `ZAZU_DEVICES`, then `CUDA_VISIBLE_DEVICES`,
    /// then the GPUs listed by `nvidia-smi -L`.
    pub fn detect() -> Self {
        for var in [DEVICES_ENV, "CUDA_VISIBLE_DEVICES"] {
            if let Ok(value) = std::env::var(var) {
                let devices = parse_device_list(&value);
                debug!(source = var, count = devices.len(), "devices from environment");
                return Self::new(devices);
            }
        }

        let devices = match Command::new("nvidia-smi").arg("-L").output() {
            Ok(output) if output.status.success() => {
                let listing = String::from_utf8_lossy(&output.stdout);
                (0..count_gpu_lines(&listing)).map(|i| i.to_string()).collect()
            }
            _ => Vec::new(),
        };
        debug!(count = devices.len(), "devices from nvidia-smi");
        Self::new(devices)
    }

    pub fn count(&self) -> usize {
        self.devices.len()
    }

    pub fn ids(&self) -> &[String] {
        &self.devices
    }

    /// Fail unless `requested` trials can each get their own device.
    pub fn check_capacity(&self, requested: usize) -> ZazuResult<()> {
        if requested > self.count() {
            return Err(ConfigError::ResourceCap {
                requested,
                available: self.count(),
            }
            .into());
        }
        Ok(())
    }
}

fn parse_device_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty() && !id.starts_with('-'))
        .map(str::to_string)
        .collect()
}

fn count_gpu_lines(listing: &str) -> usize {
    listing
        .lines()
        .filter(|line| line.trim_start().starts_with("GPU "))
        .count()
}
