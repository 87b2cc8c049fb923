//! Host metric probes (C1)
//!
//! Every field is best-effort: a failed read yields 0 for that field
//! and a warning, never an aborted sample.

use aegis_common::{DiskUsage, GpuSnapshot, Sample};
use chrono::Utc;
use std::path::Path;
use sysinfo::{Disks, System};
use tracing::warn;

const THERMAL_ZONES: &[&str] = &[
    "/host/sys/class/thermal/thermal_zone0/temp",
    "/host/sys/class/thermal/thermal_zone1/temp",
    "/sys/class/thermal/thermal_zone0/temp",
];

/// Stateful host probe; CPU usage needs consecutive refreshes, so the
/// `System` handle lives across samples.
pub struct Probes {
    system: System,
}

impl Probes {
    pub fn new() -> Self {
        let mut system = System::new();
        // Prime the CPU counters so the first real sample has a delta.
        system.refresh_cpu_usage();
        Probes { system }
    }

    /// Collect one sample. `gpu` supplies utilization and the
    /// temperature fallback when no thermal zone file exists.
    pub fn sample(&mut self, gpu: Option<&GpuSnapshot>) -> Sample {
        Sample {
            cpu: self.cpu_percent(),
            ram: self.ram_percent(),
            gpu: gpu.map(|g| g.utilization).unwrap_or(0.0),
            temperature: self.temperature(gpu),
            disk: self.disk_usage(),
            timestamp: Utc::now(),
        }
    }

    fn cpu_percent(&mut self) -> f32 {
        self.system.refresh_cpu_usage();
        self.system.global_cpu_usage()
    }

    fn ram_percent(&mut self) -> f32 {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            warn!("Error reading RAM: total memory reported as 0");
            return 0.0;
        }
        (self.system.used_memory() as f32 / total as f32) * 100.0
    }

    fn temperature(&self, gpu: Option<&GpuSnapshot>) -> f32 {
        for zone in THERMAL_ZONES {
            if Path::new(zone).exists() {
                match std::fs::read_to_string(zone) {
                    Ok(raw) => match raw.trim().parse::<f32>() {
                        Ok(millidegrees) => return millidegrees / 1000.0,
                        Err(e) => warn!("Unparseable thermal zone {}: {}", zone, e),
                    },
                    Err(e) => warn!("Error reading thermal zone {}: {}", zone, e),
                }
            }
        }

        // No thermal zone on this host: fall back to the GPU sensor.
        match gpu {
            Some(snapshot) => snapshot.temperature,
            None => {
                warn!("No temperature sensors available");
                0.0
            }
        }
    }

    fn disk_usage(&self) -> DiskUsage {
        let disks = Disks::new_with_refreshed_list();
        let root = disks
            .list()
            .iter()
            .find(|d| d.mount_point() == Path::new("/"));

        match root {
            Some(disk) => {
                let total = disk.total_space();
                let free = disk.available_space();
                let used = total.saturating_sub(free);
                DiskUsage {
                    used,
                    free,
                    total,
                    percent: if total > 0 {
                        (used as f32 / total as f32) * 100.0
                    } else {
                        0.0
                    },
                }
            }
            None => {
                warn!("Error reading disk: no mount at /");
                DiskUsage::default()
            }
        }
    }
}

impl Default for Probes {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_never_panics_without_gpu() {
        let mut probes = Probes::new();
        let sample = probes.sample(None);
        assert!(sample.cpu >= 0.0);
        assert!(sample.ram >= 0.0);
        assert_eq!(sample.gpu, 0.0);
    }

    #[test]
    fn disk_percent_bounded() {
        let probes = Probes::new();
        let disk = probes.disk_usage();
        assert!(disk.percent >= 0.0 && disk.percent <= 100.0);
    }
}
