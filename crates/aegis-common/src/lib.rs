//! Common types and utilities for the Aegis edge appliance control plane

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

pub use config::{
    Config, DatabaseConfig, DiskThresholds, EmbeddingConfig, HealingConfig, IndexerConfig,
    LlmConfig, MigrationConfig, ObjectStoreConfig, TelemetryConfig, VectorConfig,
};
pub use error::{Error, Result};
pub use types::{
    ActionType, DiskUsage, GpuClocks, GpuError, GpuHealth, GpuMemory, GpuPower, GpuSnapshot,
    Heartbeat, Sample, Severity,
};
