//! GPU telemetry via nvidia-smi.
//!
//! Everything here is fail-soft: a machine without an NVIDIA driver, a
//! missing nvidia-smi binary, or garbage CSV output all yield empty results
//! rather than errors. Quantization jobs run fine without telemetry; the UI
//! just shows nothing to chart.

use std::process::Command;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One telemetry reading for a single GPU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuSample {
    /// When the sample was taken.
    pub timestamp: DateTime<Utc>,
    /// Device index as reported by the driver.
    pub index: u32,
    /// Device name, e.g. "NVIDIA RTX 6000 Ada Generation".
    pub name: String,
    /// Compute utilization percentage (0-100).
    pub utilization: f32,
    /// Used device memory in MiB.
    pub memory_used_mib: u64,
    /// Total device memory in MiB.
    pub memory_total_mib: u64,
    /// Core temperature in Celsius.
    pub temperature: f32,
    /// Current power draw in watts.
    pub power_draw_w: f32,
    /// Board power limit in watts.
    pub power_limit_w: f32,
}

impl GpuSample {
    /// Memory usage as a percentage of total; 0 when total is unknown.
    pub fn memory_percent(&self) -> f32 {
        if self.memory_total_mib == 0 {
            0.0
        } else {
            self.memory_used_mib as f32 / self.memory_total_mib as f32 * 100.0
        }
    }

    /// Power draw as a percentage of the limit; 0 when the limit is unknown.
    pub fn power_percent(&self) -> f32 {
        if self.power_limit_w <= 0.0 {
            0.0
        } else {
            self.power_draw_w / self.power_limit_w * 100.0
        }
    }
}

/// Static device description, queried once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuDevice {
    pub index: u32,
    pub name: String,
    /// Total device memory in MiB.
    pub memory_total_mib: u64,
    pub driver_version: String,
    /// CUDA compute capability, e.g. "8.9".
    pub compute_capability: String,
}

/// Poll all devices once.
///
/// Returns one sample per GPU, or an empty vec when nvidia-smi is absent or
/// its output is unusable. Rows that fail to parse are skipped individually.
pub fn poll() -> Vec<GpuSample> {
    let output = Command::new("nvidia-smi")
        .args([
            "--query-gpu=index,name,utilization.gpu,memory.used,memory.total,temperature.gpu,power.draw,power.limit",
            "--format=csv,noheader,nounits",
        ])
        .output();

    let output = match output {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            debug!(
                "nvidia-smi returned non-zero: {}",
                String::from_utf8_lossy(&output.stderr)
            );
            return Vec::new();
        }
        Err(e) => {
            debug!("Failed to run nvidia-smi: {}", e);
            return Vec::new();
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let now = Utc::now();
    stdout
        .lines()
        .filter_map(|line| parse_sample_row(line, now))
        .collect()
}

/// Query static device info for all GPUs.
///
/// Fail-soft like [`poll`].
pub fn device_inventory() -> Vec<GpuDevice> {
    let output = Command::new("nvidia-smi")
        .args([
            "--query-gpu=index,name,memory.total,driver_version,compute_cap",
            "--format=csv,noheader,nounits",
        ])
        .output();

    let output = match output {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            debug!(
                "nvidia-smi inventory query returned non-zero: {}",
                String::from_utf8_lossy(&output.stderr)
            );
            return Vec::new();
        }
        Err(e) => {
            debug!("Failed to run nvidia-smi for inventory: {}", e);
            return Vec::new();
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout.lines().filter_map(parse_device_row).collect()
}

fn parse_sample_row(line: &str, timestamp: DateTime<Utc>) -> Option<GpuSample> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 8 {
        if !line.trim().is_empty() {
            debug!("Skipping malformed nvidia-smi row: {}", line);
        }
        return None;
    }

    // nvidia-smi reports "[N/A]" for fields a device does not expose.
    Some(GpuSample {
        timestamp,
        index: parts[0].parse().ok()?,
        name: parts[1].to_string(),
        utilization: parts[2].parse().unwrap_or(0.0),
        memory_used_mib: parts[3].parse().unwrap_or(0),
        memory_total_mib: parts[4].parse().unwrap_or(0),
        temperature: parts[5].parse().unwrap_or(0.0),
        power_draw_w: parts[6].parse().unwrap_or(0.0),
        power_limit_w: parts[7].parse().unwrap_or(0.0),
    })
}

fn parse_device_row(line: &str) -> Option<GpuDevice> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 5 {
        return None;
    }
    Some(GpuDevice {
        index: parts[0].parse().ok()?,
        name: parts[1].to_string(),
        memory_total_mib: parts[2].parse().unwrap_or(0),
        driver_version: parts[3].to_string(),
        compute_capability: parts[4].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sample_row() {
        let now = Utc::now();
        let sample = parse_sample_row(
            "0, NVIDIA RTX 6000 Ada Generation, 97, 40120, 49140, 71, 287.50, 300.00",
            now,
        )
        .unwrap();
        assert_eq!(sample.index, 0);
        assert_eq!(sample.name, "NVIDIA RTX 6000 Ada Generation");
        assert_eq!(sample.utilization, 97.0);
        assert_eq!(sample.memory_used_mib, 40120);
        assert_eq!(sample.memory_total_mib, 49140);
        assert_eq!(sample.temperature, 71.0);
        assert!((sample.power_percent() - 95.833).abs() < 0.01);
        assert!(sample.memory_percent() > 81.0 && sample.memory_percent() < 82.0);
    }

    #[test]
    fn test_parse_sample_row_na_fields() {
        // Some devices report [N/A] for power; the row still parses.
        let sample = parse_sample_row(
            "1, Tesla T4, 0, 0, 15360, 34, [N/A], [N/A]",
            Utc::now(),
        )
        .unwrap();
        assert_eq!(sample.power_draw_w, 0.0);
        assert_eq!(sample.power_percent(), 0.0);
    }

    #[test]
    fn test_parse_sample_row_malformed() {
        assert!(parse_sample_row("garbage", Utc::now()).is_none());
        assert!(parse_sample_row("", Utc::now()).is_none());
        assert!(parse_sample_row("x, y, z", Utc::now()).is_none());
    }

    #[test]
    fn test_parse_device_row() {
        let device = parse_device_row("0, NVIDIA L40S, 46068, 550.54.15, 8.9").unwrap();
        assert_eq!(device.index, 0);
        assert_eq!(device.driver_version, "550.54.15");
        assert_eq!(device.compute_capability, "8.9");
    }

    #[test]
    fn test_poll_never_panics() {
        // Passes with or without a GPU present.
        let _ = poll();
        let _ = device_inventory();
    }

    #[test]
    fn test_zero_totals_guard() {
        let sample = GpuSample {
            timestamp: Utc::now(),
            index: 0,
            name: "test".into(),
            utilization: 0.0,
            memory_used_mib: 100,
            memory_total_mib: 0,
            temperature: 0.0,
            power_draw_w: 10.0,
            power_limit_w: 0.0,
        };
        assert_eq!(sample.memory_percent(), 0.0);
        assert_eq!(sample.power_percent(), 0.0);
    }
}
