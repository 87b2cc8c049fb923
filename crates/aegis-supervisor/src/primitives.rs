//! Remediation primitives executed by the recovery ladder (C6)
//!
//! Each primitive returns a typed outcome; the executor records it in
//! the ledger. Failure never propagates as an error out of a cycle —
//! a primitive that cannot act reports `success = false` and the
//! ladder moves on.

use crate::inspector::CORE_UNITS;
use crate::runtime::ContainerRuntime;
use aegis_common::{HealingConfig, LlmConfig, Result};
use aegis_ledger::Ledger;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{error, info, warn};

/// Outcome of one primitive invocation
#[derive(Debug, Clone)]
pub struct Outcome {
    pub success: bool,
    pub duration_ms: i64,
    pub error_message: Option<String>,
}

impl Outcome {
    fn ok(started: Instant) -> Self {
        Outcome {
            success: true,
            duration_ms: started.elapsed().as_millis() as i64,
            error_message: None,
        }
    }

    fn failed(started: Instant, message: impl Into<String>) -> Self {
        Outcome {
            success: false,
            duration_ms: started.elapsed().as_millis() as i64,
            error_message: Some(message.into()),
        }
    }
}

/// The executor's toolbox of remediation actions
pub struct Primitives {
    runtime: ContainerRuntime,
    ledger: Ledger,
    llm: LlmConfig,
    healing: HealingConfig,
    client: reqwest::Client,
}

impl Primitives {
    pub fn new(
        runtime: ContainerRuntime,
        ledger: Ledger,
        llm: LlmConfig,
        healing: HealingConfig,
    ) -> Self {
        Primitives {
            runtime,
            ledger,
            llm,
            healing,
            client: reqwest::Client::new(),
        }
    }

    pub fn runtime(&self) -> &ContainerRuntime {
        &self.runtime
    }

    /// Unload every loaded inference model (keep-alive = 0), freeing
    /// VRAM and host memory. Fallback: restart the inference unit.
    pub async fn clear_llm_cache(&self) -> Outcome {
        let started = Instant::now();
        info!("Clearing LLM cache by unloading models");

        match self.loaded_models().await {
            Ok(models) => {
                for model in &models {
                    let body = serde_json::json!({ "model": model, "keep_alive": 0 });
                    match self
                        .client
                        .post(format!("{}/api/generate", self.llm.base_url()))
                        .json(&body)
                        .timeout(Duration::from_secs(10))
                        .send()
                        .await
                    {
                        Ok(_) => info!("Unloaded model: {}", model),
                        Err(e) => warn!("Failed to unload model {}: {}", model, e),
                    }
                }
                // Give the driver a moment to release VRAM.
                tokio::time::sleep(Duration::from_secs(2)).await;
                Outcome::ok(started)
            }
            Err(e) => {
                warn!("Could not clear LLM cache via API: {}", e);
                match self.runtime.restart("llm-service", 10).await {
                    Ok(()) => {
                        info!("Restarted llm-service to clear cache");
                        Outcome::ok(started)
                    }
                    Err(e) => {
                        error!("Failed to restart llm-service: {}", e);
                        Outcome::failed(started, e.to_string())
                    }
                }
            }
        }
    }

    async fn loaded_models(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.llm.base_url()))
            .timeout(Duration::from_secs(5))
            .send()
            .await?
            .error_for_status()
            .map_err(aegis_common::Error::from)?;
        let body: serde_json::Value = response.json().await?;
        Ok(body["models"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["name"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Cache clear followed by a short settle; fallback restart
    pub async fn reset_gpu_session(&self) -> Outcome {
        let started = Instant::now();
        info!("Resetting GPU session");
        let outcome = self.clear_llm_cache().await;
        if outcome.success {
            tokio::time::sleep(Duration::from_secs(2)).await;
            return Outcome::ok(started);
        }
        match self.runtime.restart("llm-service", 10).await {
            Ok(()) => Outcome::ok(started),
            Err(e) => Outcome::failed(started, e.to_string()),
        }
    }

    /// Drop into a lower power mode; fall back to restoring default
    /// clocks. Embedded boards without either tool report failure and
    /// the ladder continues.
    pub async fn throttle_gpu(&self) -> Outcome {
        let started = Instant::now();
        warn!("Applying GPU throttling");

        match run_host_command("nvpmodel", &["-m", "2"], 5).await {
            Ok(()) => {
                info!("GPU throttling applied via nvpmodel");
                return Outcome::ok(started);
            }
            Err(e) => warn!("nvpmodel failed, trying jetson_clocks: {}", e),
        }

        match run_host_command("jetson_clocks", &["--restore"], 5).await {
            Ok(()) => {
                info!("GPU throttling enabled via jetson_clocks restore");
                Outcome::ok(started)
            }
            Err(e) => {
                error!("GPU throttling failed: {}", e);
                Outcome::failed(started, e.to_string())
            }
        }
    }

    /// Reset the GPU. Discrete cards take a reset command; integrated
    /// hosts get a coordinated restart of the GPU-consuming units with
    /// a pause in between.
    pub async fn reset_gpu(&self) -> Outcome {
        let started = Instant::now();
        warn!("Performing GPU reset");

        if run_host_command("nvidia-smi", &["--gpu-reset", "-i", "0"], 30)
            .await
            .is_ok()
        {
            info!("GPU reset successful");
            tokio::time::sleep(Duration::from_secs(5)).await;
            return Outcome::ok(started);
        }

        info!("No isolated GPU reset on this host; restarting GPU-heavy units");
        let mut restarted = 0;
        for unit in ["llm-service", "embedding-service"] {
            match self.runtime.restart(unit, 10).await {
                Ok(()) => {
                    restarted += 1;
                    info!("Restarted {} for GPU reset", unit);
                }
                Err(e) => error!("Failed to restart {}: {}", unit, e),
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }

        if restarted == 2 {
            Outcome::ok(started)
        } else {
            Outcome::failed(started, "GPU reset via unit restart incomplete")
        }
    }

    /// Comprehensive disk cleanup: old logs under the fixed prune
    /// path, runtime images and build cache, then ledger and
    /// telemetry retention.
    pub async fn disk_cleanup(&self) -> Outcome {
        let started = Instant::now();
        info!("Starting comprehensive disk cleanup");
        let mut success = true;

        // Prune path is fixed configuration, never user input.
        let prune_path = self.healing.log_prune_path.display().to_string();
        if let Err(e) = run_host_command(
            "find",
            &[&prune_path, "-name", "*.log.*", "-mtime", "+7", "-delete"],
            30,
        )
        .await
        {
            warn!("Log pruning failed: {}", e);
        }

        if let Err(e) = self.runtime.system_prune().await {
            error!("Runtime prune failed: {}", e);
            success = false;
        }
        if let Err(e) = self.runtime.builder_prune().await {
            warn!("Build cache prune failed: {}", e);
        }

        if let Err(e) = self.ledger.trim_retention().await {
            error!("Ledger retention failed during cleanup: {}", e);
            success = false;
        }
        if let Err(e) = self.ledger.trim_metrics().await {
            error!("Metrics retention failed during cleanup: {}", e);
            success = false;
        }

        if success {
            info!("Disk cleanup completed successfully");
            Outcome::ok(started)
        } else {
            Outcome::failed(started, "one or more cleanup steps failed")
        }
    }

    /// VACUUM ANALYZE on a dedicated connection, pool verified after
    pub async fn db_vacuum(&self) -> Outcome {
        let started = Instant::now();
        info!("Performing database VACUUM ANALYZE");
        match self.ledger.vacuum().await {
            Ok(()) => Outcome::ok(started),
            Err(e) => {
                error!("Database VACUUM failed: {}", e);
                Outcome::failed(started, e.to_string())
            }
        }
    }

    /// Hard-restart every core unit: stop with a 5 s deadline, short
    /// pause, start.
    pub async fn hard_restart_core_units(&self) -> Outcome {
        let started = Instant::now();
        error!("Performing hard restart of core units");
        let mut restarted = 0;

        for unit in CORE_UNITS {
            let result: Result<()> = async {
                self.runtime.stop(unit, 5).await?;
                tokio::time::sleep(Duration::from_secs(1)).await;
                self.runtime.start(unit).await
            }
            .await;
            match result {
                Ok(()) => {
                    restarted += 1;
                    info!("Successfully restarted {}", unit);
                }
                Err(e) => error!("Failed to hard restart {}: {}", unit, e),
            }
        }

        if restarted == CORE_UNITS.len() {
            Outcome::ok(started)
        } else {
            Outcome::failed(
                started,
                format!("restarted {}/{} core units", restarted, CORE_UNITS.len()),
            )
        }
    }
}

/// Run a host command with a timeout; Ok only on exit status 0
async fn run_host_command(program: &str, args: &[&str], timeout_secs: u64) -> Result<()> {
    let output = tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        Command::new(program).args(args).output(),
    )
    .await
    .map_err(|_| aegis_common::Error::Timeout(format!("{program} timed out")))?
    .map_err(|e| aegis_common::Error::Runtime(format!("{program}: {e}")))?;

    if output.status.success() {
        Ok(())
    } else {
        Err(aegis_common::Error::Runtime(format!(
            "{program} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}
