//! Shared types for the Aegis control plane

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One telemetry sample of the whole host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub cpu: f32,
    pub ram: f32,
    pub gpu: f32,
    pub temperature: f32,
    pub disk: DiskUsage,
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    /// A zeroed sample used before the first probe completes
    pub fn empty() -> Self {
        Sample {
            cpu: 0.0,
            ram: 0.0,
            gpu: 0.0,
            temperature: 0.0,
            disk: DiskUsage::default(),
            timestamp: Utc::now(),
        }
    }
}

/// Root filesystem usage
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DiskUsage {
    pub used: u64,
    pub free: u64,
    pub total: u64,
    pub percent: f32,
}

/// GPU health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpuHealth {
    Healthy,
    Warning,
    Critical,
    Error,
    Unavailable,
}

/// GPU error classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpuError {
    None,
    OutOfMemory,
    GpuHang,
    ThermalThrottling,
    PowerLimit,
    EccError,
    NvlinkError,
    NvmlError,
    UnknownError,
}

/// Detailed GPU snapshot, the `/api/gpu` wire contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuSnapshot {
    pub index: u32,
    pub name: String,
    pub temperature: f32,
    pub utilization: f32,
    pub memory: GpuMemory,
    pub power: GpuPower,
    pub clocks: GpuClocks,
    pub fan_speed: Option<u32>,
    pub health: GpuHealth,
    pub error: GpuError,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GpuMemory {
    pub used_mb: u64,
    pub total_mb: u64,
    pub percent: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GpuPower {
    pub draw_w: f32,
    pub limit_w: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GpuClocks {
    pub graphics_mhz: u32,
    pub memory_mhz: u32,
}

/// Severity levels of the operator journal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
    Emergency,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
            Severity::Emergency => "EMERGENCY",
        }
    }
}

/// The closed set of recovery action types recorded in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    ServiceRestart,
    LlmCacheClear,
    GpuSessionReset,
    GpuThrottle,
    GpuReset,
    DiskCleanup,
    DbVacuum,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::ServiceRestart => "service_restart",
            ActionType::LlmCacheClear => "llm_cache_clear",
            ActionType::GpuSessionReset => "gpu_session_reset",
            ActionType::GpuThrottle => "gpu_throttle",
            ActionType::GpuReset => "gpu_reset",
            ActionType::DiskCleanup => "disk_cleanup",
            ActionType::DbVacuum => "db_vacuum",
        }
    }
}

/// Heartbeat record written by the supervisor loop each cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub timestamp: DateTime<Utc>,
    pub check_count: u64,
    pub last_action: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_enums_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&GpuError::OutOfMemory).unwrap(),
            "\"out_of_memory\""
        );
        assert_eq!(
            serde_json::to_string(&GpuHealth::Unavailable).unwrap(),
            "\"unavailable\""
        );
    }

    #[test]
    fn action_type_round_trips_as_str() {
        assert_eq!(ActionType::LlmCacheClear.as_str(), "llm_cache_clear");
        assert_eq!(
            serde_json::to_string(&ActionType::GpuSessionReset).unwrap(),
            "\"gpu_session_reset\""
        );
    }
}
