//! Telemetry and GPU health pipeline for the Aegis appliance
//!
//! A sampler task reads host and GPU counters on the live cadence,
//! a persister task commits the buffered sample on the persist
//! cadence, and an HTTP server exposes the shared state.

pub mod gpu;
pub mod persister;
pub mod probes;
pub mod server;

pub use gpu::{GpuMonitor, GpuRecovery, GpuThresholds};
pub use persister::Persister;
pub use probes::Probes;

use aegis_common::{GpuSnapshot, Result, Sample, TelemetryConfig};
use aegis_ledger::Ledger;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// State shared between the sampler, persister, and HTTP handlers
#[derive(Clone)]
pub struct TelemetryState {
    pub sample: Arc<RwLock<Sample>>,
    pub gpu: Arc<RwLock<Option<GpuSnapshot>>>,
}

impl TelemetryState {
    pub fn new() -> Self {
        TelemetryState {
            sample: Arc::new(RwLock::new(Sample::empty())),
            gpu: Arc::new(RwLock::new(None)),
        }
    }
}

impl Default for TelemetryState {
    fn default() -> Self {
        Self::new()
    }
}

/// Running telemetry pipeline; dropping the handle stops the tasks
pub struct Telemetry {
    pub state: TelemetryState,
    tasks: Vec<JoinHandle<()>>,
}

impl Telemetry {
    /// Spawn sampler, persister, retention, and HTTP server tasks
    pub fn spawn(config: TelemetryConfig, ledger: Ledger) -> Result<Telemetry> {
        let state = TelemetryState::new();
        let persister = Arc::new(Persister::new(ledger.pool().clone()));
        let mut tasks = Vec::new();

        // Sampler at T_live
        {
            let state = state.clone();
            let interval = Duration::from_secs(config.live_interval_secs);
            tasks.push(tokio::spawn(async move {
                let mut probes = Probes::new();
                let mut monitor = GpuMonitor::new(GpuThresholds::default());
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    let gpu = monitor.snapshot(0).await;
                    let sample = probes.sample(gpu.as_ref());
                    *state.sample.write().await = sample;
                    *state.gpu.write().await = gpu;
                }
            }));
        }

        // Persister at T_persist
        {
            let state = state.clone();
            let persister = persister.clone();
            let interval = Duration::from_secs(config.persist_interval_secs);
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    let sample = state.sample.read().await.clone();
                    if let Err(e) = persister.persist(&sample).await {
                        error!("Error writing metrics to database: {}", e);
                    }
                }
            }));
        }

        // Retention at T_cleanup
        {
            let ledger = ledger.clone();
            let interval = Duration::from_secs(config.cleanup_interval_secs);
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                // The first tick fires immediately; skip it so cleanup
                // runs an hour after boot, not during it.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(e) = ledger.trim_metrics().await {
                        error!("Metrics retention failed: {}", e);
                    }
                }
            }));
        }

        // HTTP surface
        {
            let state = state.clone();
            let bind = format!("{}:{}", config.bind_address, config.port);
            tasks.push(tokio::spawn(async move {
                if let Err(e) = server::serve(state, &bind).await {
                    error!("Telemetry server exited: {}", e);
                }
            }));
        }

        info!(
            "Telemetry pipeline started (live={}s, persist={}s)",
            config.live_interval_secs, config.persist_interval_secs
        );
        Ok(Telemetry { state, tasks })
    }

    pub fn shutdown(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
