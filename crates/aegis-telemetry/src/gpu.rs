//! GPU health classification and error detection (C2)
//!
//! Reads counters through NVML when available, falls back to shelling
//! out to `nvidia-smi`, and maps raw counters to a health state plus
//! an error class with a recovery recommendation for the executor.

use aegis_common::{GpuClocks, GpuError, GpuHealth, GpuMemory, GpuPower, GpuSnapshot};
use chrono::Utc;
use nvml_wrapper::enum_wrappers::device::{Clock, TemperatureSensor};
use nvml_wrapper::Nvml;
use std::collections::HashMap;
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, info, warn};

/// Classification thresholds. Memory limits are configuration in
/// spirit but ship with the appliance's 40 GB card defaults.
#[derive(Debug, Clone, Copy)]
pub struct GpuThresholds {
    pub temp_warning: f32,
    pub temp_critical: f32,
    pub temp_shutdown: f32,
    pub memory_warning_mb: u64,
    pub memory_critical_mb: u64,
    pub memory_max_mb: u64,
    pub hang_utilization: f32,
    pub hang_checks: u32,
}

impl Default for GpuThresholds {
    fn default() -> Self {
        GpuThresholds {
            temp_warning: 83.0,
            temp_critical: 85.0,
            temp_shutdown: 90.0,
            memory_warning_mb: 36 * 1024,
            memory_critical_mb: 38 * 1024,
            memory_max_mb: 40 * 1024,
            hang_utilization: 99.0,
            hang_checks: 30,
        }
    }
}

/// What the executor should do about a detected error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuRecovery {
    None,
    RestartInference,
    ResetGpu,
    ThrottleGpu,
    StopInference,
    ReduceClocks,
}

enum Backend {
    Nvml(Nvml),
    CommandLine,
    Unavailable,
}

/// Stateful GPU monitor. The hang counter is classifier-local and
/// reset explicitly whenever utilization drops below the threshold.
pub struct GpuMonitor {
    backend: Backend,
    thresholds: GpuThresholds,
    hang_counters: HashMap<u32, u32>,
    recovery_failures: u32,
}

impl GpuMonitor {
    pub fn new(thresholds: GpuThresholds) -> Self {
        let backend = match Nvml::init() {
            Ok(nvml) => {
                let count = nvml.device_count().unwrap_or(0);
                info!("NVML initialized successfully. Found {} GPU(s)", count);
                Backend::Nvml(nvml)
            }
            Err(e) => {
                warn!("NVML not available: {}", e);
                Backend::CommandLine
            }
        };
        GpuMonitor {
            backend,
            thresholds,
            hang_counters: HashMap::new(),
            recovery_failures: 0,
        }
    }

    /// Collect and classify one snapshot for `index`.
    ///
    /// Returns `None` when no backend can reach the GPU.
    pub async fn snapshot(&mut self, index: u32) -> Option<GpuSnapshot> {
        if matches!(self.backend, Backend::Unavailable) {
            return None;
        }

        if matches!(self.backend, Backend::Nvml(_)) {
            return match self.read_nvml(index) {
                Ok(snapshot) => {
                    self.recovery_failures = 0;
                    Some(snapshot)
                }
                Err(e) => {
                    error!("NVML read failed: {}", e);
                    self.recover_backend(index).await
                }
            };
        }

        match self.read_smi(index).await {
            Some(snapshot) => Some(snapshot),
            None => {
                self.recovery_failures += 1;
                if self.recovery_failures >= 2 {
                    warn!("GPU monitoring unavailable after repeated failures");
                    self.backend = Backend::Unavailable;
                }
                None
            }
        }
    }

    /// Shutdown + pause + re-initialize NVML; on persistent failure
    /// fall back to the query tool, then give up after two failed
    /// recoveries in a row.
    async fn recover_backend(&mut self, index: u32) -> Option<GpuSnapshot> {
        warn!("NVML error detected, attempting recovery...");
        self.backend = Backend::Unavailable; // drops the old handle
        tokio::time::sleep(Duration::from_secs(2)).await;

        match Nvml::init() {
            Ok(nvml) => {
                self.backend = Backend::Nvml(nvml);
                match self.read_nvml(index) {
                    Ok(snapshot) => {
                        info!("NVML reinitialized successfully");
                        self.recovery_failures = 0;
                        return Some(snapshot);
                    }
                    Err(e) => warn!("NVML still failing after reinit: {}", e),
                }
            }
            Err(e) => warn!("NVML reinit failed: {}", e),
        }

        // Library recovery failed; try the query tool.
        if let Some(snapshot) = self.read_smi(index).await {
            info!("Falling back to nvidia-smi for GPU stats");
            self.backend = Backend::CommandLine;
            self.recovery_failures = 0;
            return Some(snapshot);
        }

        self.recovery_failures += 1;
        if self.recovery_failures >= 2 {
            error!("GPU monitoring unavailable: NVML and nvidia-smi both failed");
            self.backend = Backend::Unavailable;
        } else {
            self.backend = Backend::CommandLine;
        }
        None
    }

    fn read_nvml(&mut self, index: u32) -> Result<GpuSnapshot, nvml_wrapper::error::NvmlError> {
        // Scope the NVML borrow so classification below can take &mut self.
        let (
            name,
            temperature,
            utilization,
            used_mb,
            total_mb,
            power_draw,
            power_limit,
            fan_speed,
            clock_graphics,
            clock_memory,
        ) = {
            let Backend::Nvml(nvml) = &self.backend else {
                unreachable!("read_nvml called without NVML backend");
            };
            let device = nvml.device_by_index(index)?;
            let (used_mb, total_mb) = device
                .memory_info()
                .map(|m| (m.used / (1024 * 1024), m.total / (1024 * 1024)))
                .unwrap_or((0, 1));
            (
                device.name()?,
                device.temperature(TemperatureSensor::Gpu).unwrap_or(0) as f32,
                device
                    .utilization_rates()
                    .map(|u| u.gpu as f32)
                    .unwrap_or(0.0),
                used_mb,
                total_mb,
                device.power_usage().map(|p| p as f32 / 1000.0).unwrap_or(0.0),
                device
                    .enforced_power_limit()
                    .map(|p| p as f32 / 1000.0)
                    .unwrap_or(0.0),
                device.fan_speed(0).ok(),
                device.clock_info(Clock::Graphics).unwrap_or(0),
                device.clock_info(Clock::Memory).unwrap_or(0),
            )
        };

        Ok(self.build_snapshot(
            index,
            name,
            temperature,
            utilization,
            used_mb,
            total_mb,
            GpuPower {
                draw_w: power_draw,
                limit_w: power_limit,
            },
            GpuClocks {
                graphics_mhz: clock_graphics,
                memory_mhz: clock_memory,
            },
            fan_speed,
        ))
    }

    async fn read_smi(&mut self, index: u32) -> Option<GpuSnapshot> {
        let output = tokio::time::timeout(
            Duration::from_secs(5),
            Command::new("nvidia-smi")
                .arg("--query-gpu=name,temperature.gpu,utilization.gpu,memory.used,memory.total,power.draw")
                .arg("--format=csv,noheader,nounits")
                .arg(format!("--id={}", index))
                .output(),
        )
        .await
        .ok()?
        .ok()?;

        if !output.status.success() {
            return None;
        }

        let line = String::from_utf8_lossy(&output.stdout);
        let parts: Vec<&str> = line.trim().split(", ").collect();
        if parts.len() < 6 {
            return None;
        }

        let name = parts[0].to_string();
        let temperature: f32 = parts[1].parse().ok()?;
        let utilization: f32 = parts[2].parse().ok()?;
        let used_mb: u64 = parts[3].parse().ok()?;
        let total_mb: u64 = parts[4].parse().ok()?;
        let power_draw: f32 = parts[5].parse().unwrap_or(0.0);

        Some(self.build_snapshot(
            index,
            name,
            temperature,
            utilization,
            used_mb,
            total_mb,
            GpuPower {
                draw_w: power_draw,
                limit_w: 0.0,
            },
            GpuClocks {
                graphics_mhz: 0,
                memory_mhz: 0,
            },
            None,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn build_snapshot(
        &mut self,
        index: u32,
        name: String,
        temperature: f32,
        utilization: f32,
        used_mb: u64,
        total_mb: u64,
        power: GpuPower,
        clocks: GpuClocks,
        fan_speed: Option<u32>,
    ) -> GpuSnapshot {
        let (health, error, error_message) =
            self.classify(index, temperature, utilization, used_mb);
        GpuSnapshot {
            index,
            name,
            temperature,
            utilization,
            memory: GpuMemory {
                used_mb,
                total_mb,
                percent: if total_mb > 0 {
                    (used_mb as f32 / total_mb as f32) * 100.0
                } else {
                    0.0
                },
            },
            power,
            clocks,
            fan_speed,
            health,
            error,
            error_message,
            timestamp: Utc::now(),
        }
    }

    /// Map raw counters to a health/error pair. The inclusive lower
    /// bound always picks the more severe class.
    fn classify(
        &mut self,
        index: u32,
        temp: f32,
        util: f32,
        mem_used_mb: u64,
    ) -> (GpuHealth, GpuError, Option<String>) {
        let t = self.thresholds;

        // The hang counter updates on every observation, including
        // ones that classify as thermal or OOM.
        let hang = self.track_hang(index, util);

        if temp >= t.temp_shutdown {
            return (
                GpuHealth::Critical,
                GpuError::ThermalThrottling,
                Some(format!(
                    "Temperature critical: {temp}°C (>= {}°C), shutdown recommended",
                    t.temp_shutdown
                )),
            );
        }
        if temp >= t.temp_critical {
            return (
                GpuHealth::Critical,
                GpuError::ThermalThrottling,
                Some(format!(
                    "Temperature critical: {temp}°C (>= {}°C)",
                    t.temp_critical
                )),
            );
        }
        if temp >= t.temp_warning {
            return (
                GpuHealth::Warning,
                GpuError::ThermalThrottling,
                Some(format!(
                    "Temperature warning: {temp}°C (>= {}°C)",
                    t.temp_warning
                )),
            );
        }

        if mem_used_mb >= t.memory_max_mb {
            return (
                GpuHealth::Critical,
                GpuError::OutOfMemory,
                Some(format!(
                    "Memory exceeded limit: {mem_used_mb}MB (>= {}MB)",
                    t.memory_max_mb
                )),
            );
        }
        if mem_used_mb >= t.memory_critical_mb {
            return (
                GpuHealth::Critical,
                GpuError::OutOfMemory,
                Some(format!(
                    "Memory critical: {mem_used_mb}MB (>= {}MB)",
                    t.memory_critical_mb
                )),
            );
        }
        if mem_used_mb >= t.memory_warning_mb {
            return (
                GpuHealth::Warning,
                GpuError::OutOfMemory,
                Some(format!(
                    "Memory warning: {mem_used_mb}MB (>= {}MB)",
                    t.memory_warning_mb
                )),
            );
        }

        if hang {
            return (
                GpuHealth::Critical,
                GpuError::GpuHang,
                Some(format!(
                    "GPU hang detected: {util}% utilization for >{} checks",
                    t.hang_checks
                )),
            );
        }

        (GpuHealth::Healthy, GpuError::None, None)
    }

    /// Count consecutive checks at or above the hang threshold; any
    /// sub-threshold check resets the counter regardless of prior
    /// state.
    fn track_hang(&mut self, index: u32, util: f32) -> bool {
        if util < self.thresholds.hang_utilization {
            self.hang_counters.insert(index, 0);
            return false;
        }
        let counter = self.hang_counters.entry(index).or_insert(0);
        *counter += 1;
        *counter >= self.thresholds.hang_checks
    }

    /// Recovery recommendation handed to the executor
    pub fn recommend(&self, snapshot: &GpuSnapshot) -> GpuRecovery {
        recommend(&self.thresholds, snapshot)
    }
}

/// Map an error class to the action the executor should take
pub fn recommend(thresholds: &GpuThresholds, snapshot: &GpuSnapshot) -> GpuRecovery {
    match snapshot.error {
        GpuError::None => GpuRecovery::None,
        GpuError::OutOfMemory => GpuRecovery::RestartInference,
        GpuError::GpuHang => GpuRecovery::ResetGpu,
        GpuError::ThermalThrottling => {
            if snapshot.temperature >= thresholds.temp_shutdown {
                GpuRecovery::StopInference
            } else {
                GpuRecovery::ThrottleGpu
            }
        }
        GpuError::PowerLimit => GpuRecovery::ReduceClocks,
        GpuError::EccError | GpuError::NvlinkError => GpuRecovery::ResetGpu,
        GpuError::NvmlError | GpuError::UnknownError => GpuRecovery::RestartInference,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> GpuMonitor {
        GpuMonitor {
            backend: Backend::Unavailable,
            thresholds: GpuThresholds::default(),
            hang_counters: HashMap::new(),
            recovery_failures: 0,
        }
    }

    #[test]
    fn thermal_shutdown_beats_everything() {
        let mut m = monitor();
        let (health, error, msg) = m.classify(0, 91.0, 100.0, 39_000);
        assert_eq!(health, GpuHealth::Critical);
        assert_eq!(error, GpuError::ThermalThrottling);
        assert!(msg.unwrap().contains("shutdown"));
    }

    #[test]
    fn memory_tiers_choose_more_severe_class() {
        let mut m = monitor();
        assert_eq!(m.classify(0, 50.0, 10.0, 36_900).0, GpuHealth::Warning);
        assert_eq!(m.classify(0, 50.0, 10.0, 38_912).1, GpuError::OutOfMemory);
        let (health, _, _) = m.classify(0, 50.0, 10.0, 40_960);
        assert_eq!(health, GpuHealth::Critical);
    }

    #[test]
    fn hang_requires_thirty_consecutive_checks() {
        let mut m = monitor();
        for _ in 0..29 {
            let (_, error, _) = m.classify(0, 50.0, 99.5, 1000);
            assert_eq!(error, GpuError::None);
        }
        let (health, error, _) = m.classify(0, 50.0, 99.5, 1000);
        assert_eq!(health, GpuHealth::Critical);
        assert_eq!(error, GpuError::GpuHang);
    }

    #[test]
    fn single_dip_resets_hang_counter() {
        let mut m = monitor();
        for _ in 0..29 {
            m.classify(0, 50.0, 100.0, 1000);
        }
        // One sub-threshold read clears the streak.
        let (_, error, _) = m.classify(0, 50.0, 98.9, 1000);
        assert_eq!(error, GpuError::None);
        let (_, error, _) = m.classify(0, 50.0, 100.0, 1000);
        assert_eq!(error, GpuError::None);
    }

    #[test]
    fn recommendations_match_error_class() {
        let m = monitor();
        let mut snapshot = GpuSnapshot {
            index: 0,
            name: "test".into(),
            temperature: 84.0,
            utilization: 10.0,
            memory: GpuMemory {
                used_mb: 0,
                total_mb: 1,
                percent: 0.0,
            },
            power: GpuPower {
                draw_w: 0.0,
                limit_w: 0.0,
            },
            clocks: GpuClocks {
                graphics_mhz: 0,
                memory_mhz: 0,
            },
            fan_speed: None,
            health: GpuHealth::Warning,
            error: GpuError::ThermalThrottling,
            error_message: None,
            timestamp: Utc::now(),
        };
        assert_eq!(m.recommend(&snapshot), GpuRecovery::ThrottleGpu);

        snapshot.temperature = 90.0;
        assert_eq!(m.recommend(&snapshot), GpuRecovery::StopInference);

        snapshot.error = GpuError::OutOfMemory;
        assert_eq!(m.recommend(&snapshot), GpuRecovery::RestartInference);

        snapshot.error = GpuError::GpuHang;
        assert_eq!(m.recommend(&snapshot), GpuRecovery::ResetGpu);
    }
}
