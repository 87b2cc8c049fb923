//! Recovery executor (C6) — the ladder
//!
//! Category A handles unhealthy units with tiered restarts, Category B
//! relieves resource overload, Category C is hard recovery, Category D
//! is the safety-gated host reboot. Transitions are decided by ledger
//! counters and primitive outcomes, never by exception flow; every
//! attempt lands in the ledger with its outcome.

use crate::inspector::InspectedUnit;
use crate::primitives::{Outcome, Primitives};
use crate::reboot_gate::RebootGate;
use aegis_common::{
    ActionType, DiskThresholds, GpuError, GpuSnapshot, HealingConfig, Sample, Severity,
};
use aegis_ledger::Ledger;
use aegis_telemetry::gpu::{recommend, GpuRecovery, GpuThresholds};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Per-dimension debounce for Category B overload actions
const OVERLOAD_DEBOUNCE: Duration = Duration::from_secs(300);
/// Thermal restart gets a longer debounce
const THERMAL_DEBOUNCE: Duration = Duration::from_secs(600);
/// At most one Category C sequence per hour
const CRITICAL_COOLDOWN: Duration = Duration::from_secs(3600);
/// Cooldown window consulted before Category A acts, minutes
const SERVICE_COOLDOWN_MINUTES: i32 = 5;

const CPU_OVERLOAD: f32 = 90.0;
const RAM_OVERLOAD: f32 = 90.0;
const GPU_OVERLOAD: f32 = 95.0;
const TEMP_THROTTLE: f32 = 83.0;
const TEMP_RESTART: f32 = 85.0;

/// The ladder state machine
pub struct RecoveryExecutor {
    healing: HealingConfig,
    disk: DiskThresholds,
    ledger: Ledger,
    primitives: Primitives,
    gate: RebootGate,
    gpu_thresholds: GpuThresholds,
    debounce: Mutex<HashMap<&'static str, Instant>>,
    last_critical_action: Mutex<Option<Instant>>,
    last_action: Mutex<Option<String>>,
}

impl RecoveryExecutor {
    pub fn new(
        healing: HealingConfig,
        disk: DiskThresholds,
        ledger: Ledger,
        primitives: Primitives,
        gate: RebootGate,
    ) -> Self {
        RecoveryExecutor {
            healing,
            disk,
            ledger,
            primitives,
            gate,
            gpu_thresholds: GpuThresholds::default(),
            debounce: Mutex::new(HashMap::new()),
            last_critical_action: Mutex::new(None),
            last_action: Mutex::new(None),
        }
    }

    /// Last executed action, surfaced in the heartbeat
    pub fn last_action(&self) -> Option<String> {
        self.last_action.lock().clone()
    }

    fn note_action(&self, action: &str) {
        *self.last_action.lock() = Some(action.to_string());
    }

    /// True when the keyed action already fired within `window`
    fn in_debounce(&self, key: &'static str, window: Duration) -> bool {
        let map = self.debounce.lock();
        matches!(map.get(key), Some(last) if last.elapsed() < window)
    }

    fn mark_debounce(&self, key: &'static str) {
        self.debounce.lock().insert(key, Instant::now());
    }

    async fn record(
        &self,
        action_type: ActionType,
        service: Option<&str>,
        reason: &str,
        outcome: &Outcome,
    ) {
        self.note_action(action_type.as_str());
        if let Err(e) = self
            .ledger
            .record_recovery_action(
                action_type,
                service,
                reason,
                outcome.success,
                Some(outcome.duration_ms),
                outcome.error_message.as_deref(),
                None,
            )
            .await
        {
            error!("Failed to record recovery action: {}", e);
        }
    }

    // ====================================================================
    // Category A: service-level recovery
    // ====================================================================

    pub async fn handle_unhealthy_unit(&self, unit: &InspectedUnit) {
        let name = unit.state.name.as_str();

        if let Err(e) = self.ledger.record_failure(name, "unhealthy", Some("down")).await {
            error!("Failed to record failure for {}: {}", name, e);
        }

        match self.ledger.is_in_cooldown(name, SERVICE_COOLDOWN_MINUTES).await {
            Ok(true) => {
                warn!("Service {} is in cooldown, skipping recovery", name);
                return;
            }
            Ok(false) => {}
            Err(e) => {
                error!("Cooldown check failed for {}: {}", name, e);
                return;
            }
        }

        let failures = match self
            .ledger
            .failure_count(name, self.healing.failure_window_minutes as i32)
            .await
        {
            Ok(n) => n,
            Err(e) => {
                error!("Failure count unavailable for {}: {}", name, e);
                return;
            }
        };
        warn!("Service {} unhealthy (failures in window: {})", name, failures);

        let max = self.healing.max_failures_in_window;
        if failures <= 1 {
            info!("Attempting restart of {} (attempt 1/{})", name, max);
            let started = Instant::now();
            let outcome = match self.primitives.runtime().restart(name, 10).await {
                Ok(()) => Outcome {
                    success: true,
                    duration_ms: started.elapsed().as_millis() as i64,
                    error_message: None,
                },
                Err(e) => Outcome {
                    success: false,
                    duration_ms: started.elapsed().as_millis() as i64,
                    error_message: Some(e.to_string()),
                },
            };
            let severity = if outcome.success {
                Severity::Warning
            } else {
                Severity::Critical
            };
            let event = if outcome.success {
                "service_restart"
            } else {
                "service_recovery_failed"
            };
            let _ = self
                .ledger
                .log_event(
                    event,
                    severity,
                    &format!("{name} unhealthy, performing restart"),
                    "unit restart",
                    Some(name),
                    outcome.success,
                )
                .await;
            self.record(
                ActionType::ServiceRestart,
                Some(name),
                &format!("Health check failed (1/{max})"),
                &outcome,
            )
            .await;
        } else if failures == 2 {
            info!("Attempting stop and start of {} (attempt 2/{})", name, max);
            let started = Instant::now();
            let result: aegis_common::Result<()> = async {
                self.primitives.runtime().stop(name, 10).await?;
                tokio::time::sleep(Duration::from_secs(2)).await;
                self.primitives.runtime().start(name).await
            }
            .await;
            let outcome = match result {
                Ok(()) => Outcome {
                    success: true,
                    duration_ms: started.elapsed().as_millis() as i64,
                    error_message: None,
                },
                Err(e) => Outcome {
                    success: false,
                    duration_ms: started.elapsed().as_millis() as i64,
                    error_message: Some(e.to_string()),
                },
            };
            let _ = self
                .ledger
                .log_event(
                    "service_stop_start",
                    Severity::Warning,
                    &format!("{name} still unhealthy, performing stop+start"),
                    "unit stop + start",
                    Some(name),
                    outcome.success,
                )
                .await;
            self.record(
                ActionType::ServiceRestart,
                Some(name),
                &format!("Health check failed after restart (2/{max})"),
                &outcome,
            )
            .await;
        } else if failures >= max {
            error!(
                "Service {} failed {} times in {}min window, escalating",
                name, failures, self.healing.failure_window_minutes
            );
            let _ = self
                .ledger
                .log_event(
                    "service_escalation",
                    Severity::Critical,
                    &format!("{name} failed {failures} times, escalating to hard recovery"),
                    "Triggering hard recovery",
                    Some(name),
                    true,
                )
                .await;
            let reason = format!(
                "Service {} failed {} times in {} minutes",
                name, failures, self.healing.failure_window_minutes
            );
            Box::pin(self.handle_critical(&reason, None)).await;
        }
    }

    // ====================================================================
    // Category B: resource overload
    // ====================================================================

    pub async fn handle_overload(&self, sample: &Sample) {
        let cpu = sample.cpu;
        let ram = sample.ram;
        let gpu = sample.gpu;
        let temp = sample.temperature;

        if cpu > CPU_OVERLOAD && !self.in_debounce("cpu_overload", OVERLOAD_DEBOUNCE) {
            warn!("CPU overload detected: {:.1}% - unloading inference models", cpu);
            let outcome = self.primitives.clear_llm_cache().await;
            let _ = self
                .ledger
                .log_event(
                    "cpu_overload",
                    Severity::Warning,
                    &format!("CPU usage at {cpu:.1}%"),
                    if outcome.success {
                        "Unloaded inference models"
                    } else {
                        "Failed to unload models"
                    },
                    Some("llm-service"),
                    outcome.success,
                )
                .await;
            self.record(
                ActionType::LlmCacheClear,
                Some("llm-service"),
                &format!("CPU overload: {cpu:.1}%"),
                &outcome,
            )
            .await;
            self.mark_debounce("cpu_overload");
        }

        if ram > RAM_OVERLOAD && !self.in_debounce("ram_overload", OVERLOAD_DEBOUNCE) {
            warn!("RAM overload detected: {:.1}% - restarting broker host", ram);
            let started = Instant::now();
            let outcome = match self.primitives.runtime().restart("broker-host", 10).await {
                Ok(()) => Outcome {
                    success: true,
                    duration_ms: started.elapsed().as_millis() as i64,
                    error_message: None,
                },
                Err(e) => Outcome {
                    success: false,
                    duration_ms: started.elapsed().as_millis() as i64,
                    error_message: Some(e.to_string()),
                },
            };
            let _ = self
                .ledger
                .log_event(
                    "ram_overload",
                    Severity::Warning,
                    &format!("RAM usage at {ram:.1}%"),
                    if outcome.success {
                        "Restarted broker host to shed caches"
                    } else {
                        "Failed to free memory"
                    },
                    Some("broker-host"),
                    outcome.success,
                )
                .await;
            self.record(
                ActionType::ServiceRestart,
                Some("broker-host"),
                &format!("RAM overload: {ram:.1}%"),
                &outcome,
            )
            .await;
            self.mark_debounce("ram_overload");
        }

        if gpu > GPU_OVERLOAD && !self.in_debounce("gpu_overload", OVERLOAD_DEBOUNCE) {
            warn!("GPU overload detected: {:.1}% - resetting GPU session", gpu);
            let outcome = self.primitives.reset_gpu_session().await;
            let _ = self
                .ledger
                .log_event(
                    "gpu_overload",
                    Severity::Critical,
                    &format!("GPU usage at {gpu:.1}%"),
                    if outcome.success {
                        "Reset GPU session"
                    } else {
                        "Failed to reset session"
                    },
                    Some("llm-service"),
                    outcome.success,
                )
                .await;
            self.record(
                ActionType::GpuSessionReset,
                Some("llm-service"),
                &format!("GPU overload: {gpu:.1}%"),
                &outcome,
            )
            .await;
            self.mark_debounce("gpu_overload");
        }

        if temp > TEMP_RESTART {
            if !self.in_debounce("temp_critical", THERMAL_DEBOUNCE) {
                error!("Critical temperature: {:.1}°C - restarting inference service", temp);
                let started = Instant::now();
                let outcome = match self.primitives.runtime().restart("llm-service", 10).await {
                    Ok(()) => Outcome {
                        success: true,
                        duration_ms: started.elapsed().as_millis() as i64,
                        error_message: None,
                    },
                    Err(e) => Outcome {
                        success: false,
                        duration_ms: started.elapsed().as_millis() as i64,
                        error_message: Some(e.to_string()),
                    },
                };
                let _ = self
                    .ledger
                    .log_event(
                        "thermal_critical",
                        Severity::Critical,
                        &format!("System temperature at {temp:.1}°C (threshold: {TEMP_RESTART}°C)"),
                        if outcome.success {
                            "Restarted inference service"
                        } else {
                            "Failed to restart service"
                        },
                        Some("llm-service"),
                        outcome.success,
                    )
                    .await;
                self.record(
                    ActionType::ServiceRestart,
                    Some("llm-service"),
                    &format!("Critical temperature: {temp:.1}°C"),
                    &outcome,
                )
                .await;
                self.mark_debounce("temp_critical");
            }
        } else if temp > TEMP_THROTTLE && !self.in_debounce("temp_throttle", OVERLOAD_DEBOUNCE) {
            warn!("High temperature: {:.1}°C - throttling GPU", temp);
            let outcome = self.primitives.throttle_gpu().await;
            let _ = self
                .ledger
                .log_event(
                    "thermal_warning",
                    Severity::Warning,
                    &format!("System temperature at {temp:.1}°C (threshold: {TEMP_THROTTLE}°C)"),
                    if outcome.success {
                        "Applied GPU throttling"
                    } else {
                        "Failed to throttle GPU"
                    },
                    None,
                    outcome.success,
                )
                .await;
            self.record(
                ActionType::GpuThrottle,
                None,
                &format!("High temperature: {temp:.1}°C"),
                &outcome,
            )
            .await;
            self.mark_debounce("temp_throttle");
        }
    }

    // ====================================================================
    // GPU error handling (C2 recommendation -> primitive)
    // ====================================================================

    pub async fn handle_gpu_error(&self, snapshot: &GpuSnapshot) {
        if snapshot.error == GpuError::None {
            return;
        }

        let severity = match snapshot.error {
            GpuError::OutOfMemory | GpuError::GpuHang => Severity::Critical,
            _ => Severity::Warning,
        };
        let label = gpu_error_label(snapshot.error);
        let _ = self
            .ledger
            .log_event(
                "gpu_error_detected",
                severity,
                &format!("GPU Error: {label}"),
                snapshot
                    .error_message
                    .as_deref()
                    .unwrap_or("GPU error detected"),
                Some("llm-service"),
                true,
            )
            .await;

        if self.in_debounce("gpu_error", OVERLOAD_DEBOUNCE) {
            return;
        }

        let reason = format!("GPU {}: {}", label, gpu_magnitude(snapshot));
        let action = recommend(&self.gpu_thresholds, snapshot);
        warn!("GPU Error: {} - Action: {:?}", label, action);

        let (action_type, outcome) = match action {
            GpuRecovery::None => return,
            GpuRecovery::RestartInference => (
                ActionType::LlmCacheClear,
                self.primitives.clear_llm_cache().await,
            ),
            GpuRecovery::ResetGpu => (ActionType::GpuReset, self.primitives.reset_gpu().await),
            GpuRecovery::ThrottleGpu | GpuRecovery::ReduceClocks => {
                (ActionType::GpuThrottle, self.primitives.throttle_gpu().await)
            }
            GpuRecovery::StopInference => {
                let started = Instant::now();
                let outcome = match self.primitives.runtime().stop("llm-service", 30).await {
                    Ok(()) => Outcome {
                        success: true,
                        duration_ms: started.elapsed().as_millis() as i64,
                        error_message: None,
                    },
                    Err(e) => Outcome {
                        success: false,
                        duration_ms: started.elapsed().as_millis() as i64,
                        error_message: Some(e.to_string()),
                    },
                };
                (ActionType::ServiceRestart, outcome)
            }
        };

        self.record(action_type, Some("llm-service"), &reason, &outcome)
            .await;
        self.mark_debounce("gpu_error");

        let (event, severity) = if outcome.success {
            ("gpu_recovery_success", Severity::Info)
        } else {
            ("gpu_recovery_failed", Severity::Critical)
        };
        let _ = self
            .ledger
            .log_event(
                event,
                severity,
                &format!("GPU recovery {:?}", action),
                &format!("{} in {}ms", action_type.as_str(), outcome.duration_ms),
                Some("llm-service"),
                outcome.success,
            )
            .await;
    }

    // ====================================================================
    // Category C: hard recovery
    // ====================================================================

    pub async fn handle_critical(&self, reason: &str, sample: Option<&Sample>) {
        {
            let last = self.last_critical_action.lock();
            if let Some(at) = *last {
                if at.elapsed() < CRITICAL_COOLDOWN {
                    warn!(
                        "Hard recovery triggered but in cooldown (last action < 1h ago). Reason: {}",
                        reason
                    );
                    return;
                }
            }
        }

        error!("CRITICAL EVENT: {}", reason);
        let _ = self
            .ledger
            .log_event(
                "critical_event",
                Severity::Critical,
                reason,
                "Initiating hard recovery sequence",
                None,
                true,
            )
            .await;

        let critical_count = self
            .ledger
            .critical_events_count(self.healing.critical_window_minutes as i32)
            .await
            .unwrap_or(0);
        info!(
            "Critical events in last {}min: {}",
            self.healing.critical_window_minutes, critical_count
        );

        // 1. Hard-restart every core unit
        let outcome = self.primitives.hard_restart_core_units().await;
        self.record(
            ActionType::ServiceRestart,
            Some("all-core-units"),
            "Hard recovery - restart all core units",
            &outcome,
        )
        .await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        // 2. Disk cleanup
        let outcome = self.primitives.disk_cleanup().await;
        self.record(
            ActionType::DiskCleanup,
            None,
            "Hard recovery - disk cleanup",
            &outcome,
        )
        .await;

        // 3. Database vacuum
        let outcome = self.primitives.db_vacuum().await;
        self.record(
            ActionType::DbVacuum,
            Some("postgres-db"),
            "Hard recovery - database vacuum",
            &outcome,
        )
        .await;

        // 4. GPU reset when the trigger is GPU-flavored
        let lowered = reason.to_lowercase();
        if lowered.contains("gpu") || lowered.contains("llm") {
            let outcome = self.primitives.reset_gpu().await;
            self.record(
                ActionType::GpuReset,
                Some("llm-service"),
                &format!("Hard recovery - GPU reset ({reason})"),
                &outcome,
            )
            .await;
        }

        *self.last_critical_action.lock() = Some(Instant::now());

        if critical_count >= self.healing.max_critical_events {
            error!(
                "Multiple critical events detected ({}), escalating to reboot",
                critical_count
            );
            let escalation = format!(
                "Multiple critical failures: {} events in {}min",
                critical_count, self.healing.critical_window_minutes
            );
            self.handle_reboot(&escalation, sample).await;
        }
    }

    // ====================================================================
    // Category D: host reboot
    // ====================================================================

    pub async fn handle_reboot(&self, reason: &str, sample: Option<&Sample>) {
        error!("SYSTEM REBOOT TRIGGERED: {}", reason);
        let _ = self
            .ledger
            .log_event(
                "system_reboot",
                Severity::Emergency,
                &format!("System reboot triggered: {reason}"),
                "Saving state and initiating reboot",
                None,
                true,
            )
            .await;

        let disk_percent = sample.map(|s| s.disk.percent).unwrap_or(0.0);
        if !self.gate.check(reason, disk_percent).await {
            error!("Reboot safety checks failed - aborting reboot");
            return;
        }

        // Pre-reboot snapshot: services, last sample, disk, criticals
        let services = match self.primitives.runtime().list_units().await {
            Ok(units) => units
                .into_iter()
                .map(|u| {
                    (
                        u.name.clone(),
                        serde_json::json!({ "status": u.status, "health": u.health }),
                    )
                })
                .collect::<serde_json::Map<String, serde_json::Value>>(),
            Err(_) => serde_json::Map::new(),
        };
        let critical_events = self
            .ledger
            .critical_events_count(self.healing.critical_window_minutes as i32)
            .await
            .unwrap_or(0);
        let pre_state = serde_json::json!({
            "reason": reason,
            "services": services,
            "metrics": sample,
            "disk_usage": disk_percent,
            "critical_events": critical_events,
        });

        match self.ledger.save_reboot_state(reason, pre_state).await {
            Ok(id) => info!("Pre-reboot state saved with ID: {}", id),
            Err(e) => error!("Failed to save reboot state: {}", e),
        }

        if self.healing.reboot_enabled {
            error!("Initiating system reboot in 10 seconds...");
            self.note_action("system_reboot");
            tokio::time::sleep(Duration::from_secs(10)).await;
            let result = tokio::time::timeout(
                Duration::from_secs(5),
                tokio::process::Command::new("sudo").arg("reboot").status(),
            )
            .await;
            match result {
                Ok(Ok(status)) if status.success() => {}
                other => {
                    error!("Reboot command failed: {:?} - MANUAL REBOOT REQUIRED", other);
                }
            }
        } else {
            error!("REBOOT DISABLED - Manual intervention required");
            error!("Reboot would be triggered for: {}", reason);
            error!("Enable reboots by setting SELF_HEALING_REBOOT_ENABLED=true");
        }
    }

    // ====================================================================
    // Disk ladder
    // ====================================================================

    pub async fn check_disk(&self, sample: &Sample) {
        let percent = sample.disk.percent;

        if percent >= self.disk.reboot {
            error!("Disk usage critical for reboot: {:.1}%", percent);
            self.handle_reboot(&format!("Disk usage at {percent:.1}%"), Some(sample))
                .await;
        } else if percent >= self.disk.critical {
            error!("Disk usage critical: {:.1}%", percent);
            let _ = self
                .ledger
                .log_event(
                    "disk_critical",
                    Severity::Critical,
                    &format!("Disk usage at {percent:.1}%"),
                    "Performing emergency cleanup",
                    None,
                    true,
                )
                .await;
            let outcome = self.primitives.disk_cleanup().await;
            self.record(
                ActionType::DiskCleanup,
                None,
                &format!("Disk usage at {percent:.1}%"),
                &outcome,
            )
            .await;
        } else if percent >= self.disk.cleanup {
            warn!("Disk usage high: {:.1}% - starting cleanup", percent);
            let outcome = self.primitives.disk_cleanup().await;
            self.record(
                ActionType::DiskCleanup,
                None,
                &format!("Disk usage at {percent:.1}%"),
                &outcome,
            )
            .await;
        } else if percent >= self.disk.warning {
            warn!("Disk usage warning: {:.1}%", percent);
        }
    }
}

fn gpu_error_label(error: GpuError) -> &'static str {
    match error {
        GpuError::None => "none",
        GpuError::OutOfMemory => "out_of_memory",
        GpuError::GpuHang => "gpu_hang",
        GpuError::ThermalThrottling => "thermal_throttling",
        GpuError::PowerLimit => "power_limit",
        GpuError::EccError => "ecc_error",
        GpuError::NvlinkError => "nvlink_error",
        GpuError::NvmlError => "nvml_error",
        GpuError::UnknownError => "unknown_error",
    }
}

/// The numeric magnitude that must accompany every GPU action reason
fn gpu_magnitude(snapshot: &GpuSnapshot) -> String {
    match snapshot.error {
        GpuError::OutOfMemory => format!("{}MB", snapshot.memory.used_mb),
        GpuError::GpuHang => format!("{:.1}% utilization", snapshot.utilization),
        GpuError::ThermalThrottling => format!("{:.1}°C", snapshot.temperature),
        GpuError::PowerLimit => format!("{:.1}W", snapshot.power.draw_w),
        _ => format!("{:.1}% utilization", snapshot.utilization),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_common::{GpuClocks, GpuHealth, GpuMemory, GpuPower};
    use chrono::Utc;

    fn snapshot(error: GpuError) -> GpuSnapshot {
        GpuSnapshot {
            index: 0,
            name: "test".into(),
            temperature: 55.0,
            utilization: 30.0,
            memory: GpuMemory {
                used_mb: 39_936,
                total_mb: 40_960,
                percent: 97.5,
            },
            power: GpuPower {
                draw_w: 50.0,
                limit_w: 60.0,
            },
            clocks: GpuClocks {
                graphics_mhz: 0,
                memory_mhz: 0,
            },
            fan_speed: None,
            health: GpuHealth::Critical,
            error,
            error_message: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn gpu_reason_carries_magnitude() {
        let reason = format!(
            "GPU {}: {}",
            gpu_error_label(GpuError::OutOfMemory),
            gpu_magnitude(&snapshot(GpuError::OutOfMemory))
        );
        assert!(reason.contains("GPU"));
        assert!(reason.contains("39936MB"));

        let hang = format!(
            "GPU {}: {}",
            gpu_error_label(GpuError::GpuHang),
            gpu_magnitude(&snapshot(GpuError::GpuHang))
        );
        assert!(hang.contains("% utilization"));
    }
}
