//! Supervisor loop (C12)
//!
//! One cooperative loop at `T_heal`: heartbeat, telemetry read with a
//! liveness watchdog, GPU error handling, the disk ladder, Category A
//! over unhealthy units, Category B over the sample, and periodic
//! ledger retention. A panicking cycle is caught at the boundary and
//! the loop continues.

use crate::executor::RecoveryExecutor;
use crate::heartbeat;
use crate::inspector::ServiceInspector;
use crate::runtime::ContainerRuntime;
use aegis_common::{Config, GpuError, GpuSnapshot, Sample, Severity};
use aegis_ledger::Ledger;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Telemetry unit restarted by the watchdog when live reads stall
const TELEMETRY_UNIT: &str = "metrics-collector";
/// Ledger retention runs every this many cycles
const RETENTION_EVERY_CYCLES: u64 = 100;

pub struct HealingEngine {
    config: Config,
    ledger: Ledger,
    inspector: ServiceInspector,
    executor: Arc<RecoveryExecutor>,
    runtime: ContainerRuntime,
    client: reqwest::Client,
    check_count: u64,
    metrics_down_since: Option<Instant>,
    consecutive_cycle_failures: u32,
}

impl HealingEngine {
    pub fn new(
        config: Config,
        ledger: Ledger,
        inspector: ServiceInspector,
        executor: Arc<RecoveryExecutor>,
        runtime: ContainerRuntime,
    ) -> Self {
        HealingEngine {
            config,
            ledger,
            inspector,
            executor,
            runtime,
            client: reqwest::Client::new(),
            check_count: 0,
            metrics_down_since: None,
            consecutive_cycle_failures: 0,
        }
    }

    /// Run until the shutdown signal fires
    pub async fn run(&mut self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            "Supervisor loop starting (interval={}s, enabled={}, reboot_enabled={})",
            self.config.healing.interval_secs,
            self.config.healing.enabled,
            self.config.healing.reboot_enabled
        );
        if !self.config.healing.enabled {
            warn!("Self-healing is DISABLED - monitoring only mode");
        }

        let _ = self
            .ledger
            .log_event(
                "engine_started",
                Severity::Info,
                "Self-healing supervisor started",
                "Monitoring all units with failure tracking",
                None,
                true,
            )
            .await;

        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.healing.interval_secs));
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }

            let result = AssertUnwindSafe(self.cycle()).catch_unwind().await;
            match result {
                Ok(()) => self.consecutive_cycle_failures = 0,
                Err(_) => {
                    self.consecutive_cycle_failures += 1;
                    error!(
                        "Healing cycle panicked ({} consecutive)",
                        self.consecutive_cycle_failures
                    );
                    if self.consecutive_cycle_failures >= 3 {
                        let _ = self
                            .ledger
                            .log_event(
                                "cycle_failures",
                                Severity::Critical,
                                "Three consecutive healing cycles failed",
                                "Loop continues in degraded mode",
                                None,
                                false,
                            )
                            .await;
                        self.consecutive_cycle_failures = 0;
                    }
                }
            }
        }

        let _ = self
            .ledger
            .log_event(
                "engine_stopped",
                Severity::Info,
                "Self-healing supervisor stopped",
                &format!("Completed {} healing cycles", self.check_count),
                None,
                true,
            )
            .await;
        let _ = heartbeat::write(
            &self.config.healing.heartbeat_file,
            self.check_count,
            Some("stopping".into()),
        )
        .await;
        info!("Supervisor loop stopped after {} cycles", self.check_count);
    }

    async fn cycle(&mut self) {
        debug!("Running healing cycle {}", self.check_count);

        // 1. Heartbeat first so the health probe sees progress even
        //    when the rest of the cycle fails.
        if let Err(e) = heartbeat::write(
            &self.config.healing.heartbeat_file,
            self.check_count,
            self.executor.last_action(),
        )
        .await
        {
            warn!("Failed to update heartbeat: {}", e);
        }
        self.check_count += 1;

        // 2. Telemetry sample with liveness watchdog
        let sample = self.fetch_sample().await;
        match &sample {
            None => self.telemetry_watchdog().await,
            Some(_) => {
                if self.metrics_down_since.take().is_some() {
                    info!("Telemetry collection recovered");
                }
            }
        }

        if !self.config.healing.enabled {
            return;
        }

        // 3. GPU health and error-driven recovery
        if let Some(snapshot) = self.fetch_gpu().await {
            if snapshot.error != GpuError::None {
                self.executor.handle_gpu_error(&snapshot).await;
            }
        }

        // 4. Disk ladder
        if let Some(sample) = &sample {
            self.executor.check_disk(sample).await;
        }

        // 5. Category A over unhealthy, eligible units
        match self.inspector.inspect().await {
            Ok(units) => {
                for unit in &units {
                    if !unit.eligible_for_recovery() {
                        debug!("Skipping {} - not eligible for recovery", unit.state.name);
                        continue;
                    }
                    if unit.state.is_unhealthy() {
                        self.executor.handle_unhealthy_unit(unit).await;
                    }
                }
            }
            Err(e) => error!("Failed to check services: {}", e),
        }

        // 6. Category B against the sample
        if let Some(sample) = &sample {
            self.executor.handle_overload(sample).await;
        }

        // 7. Periodic ledger retention
        if self.check_count > 0 && self.check_count % RETENTION_EVERY_CYCLES == 0 {
            info!("Running periodic ledger retention");
            if let Err(e) = self.ledger.trim_retention().await {
                error!("Ledger retention failed: {}", e);
            }
        }
    }

    async fn fetch_sample(&self) -> Option<Sample> {
        match self
            .client
            .get(format!("{}/metrics", self.config.telemetry.base_url()))
            .timeout(Duration::from_secs(2))
            .send()
            .await
        {
            Ok(response) => response.json::<Sample>().await.ok(),
            Err(e) => {
                debug!("Failed to get metrics: {}", e);
                None
            }
        }
    }

    async fn fetch_gpu(&self) -> Option<GpuSnapshot> {
        let body: serde_json::Value = self
            .client
            .get(format!("{}/api/gpu", self.config.telemetry.base_url()))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .ok()?
            .json()
            .await
            .ok()?;
        if body["available"] != true {
            return None;
        }
        serde_json::from_value(body["gpu"].clone()).ok()
    }

    /// After 60 s without a live sample, restart the telemetry unit
    /// once and reset the timer so it has time to come back.
    async fn telemetry_watchdog(&mut self) {
        match self.metrics_down_since {
            None => {
                self.metrics_down_since = Some(Instant::now());
                warn!("Telemetry collection failed - entering warning state");
            }
            Some(since) if since.elapsed() > Duration::from_secs(60) => {
                error!("Telemetry down for > 1 minute - attempting restart");
                match self.runtime.restart(TELEMETRY_UNIT, 10).await {
                    Ok(()) => {
                        self.metrics_down_since = Some(Instant::now());
                        let _ = self
                            .ledger
                            .log_event(
                                "metrics_recovery",
                                Severity::Warning,
                                "Telemetry unit down > 1min",
                                "Restarted telemetry unit",
                                Some(TELEMETRY_UNIT),
                                true,
                            )
                            .await;
                    }
                    Err(e) => error!("Failed to restart {}: {}", TELEMETRY_UNIT, e),
                }
            }
            Some(_) => {}
        }
    }
}
