//! Post-reboot validation (C7)
//!
//! On the first supervisor start after a boot, the unique unfinished
//! reboot row drives a validation pass: core units up, database and
//! telemetry reachable, disk below the critical threshold, GPU
//! queryable. The outcome lands in the reboot row and the journal.

use crate::inspector::CORE_UNITS;
use crate::runtime::ContainerRuntime;
use aegis_common::{Sample, Severity, TelemetryConfig};
use aegis_ledger::Ledger;
use std::time::Duration;
use tracing::{info, warn};

const STABILIZATION_WAIT: Duration = Duration::from_secs(30);

pub struct PostRebootValidator {
    ledger: Ledger,
    runtime: ContainerRuntime,
    telemetry: TelemetryConfig,
    client: reqwest::Client,
}

impl PostRebootValidator {
    pub fn new(ledger: Ledger, runtime: ContainerRuntime, telemetry: TelemetryConfig) -> Self {
        PostRebootValidator {
            ledger,
            runtime,
            telemetry,
            client: reqwest::Client::new(),
        }
    }

    /// Look for a pending reboot row and validate the recovered state
    pub async fn run(&self) {
        let pending = match self.ledger.pending_reboot().await {
            Ok(Some(event)) => event,
            Ok(None) => {
                info!("No pending reboot validation");
                return;
            }
            Err(e) => {
                warn!("Pending reboot lookup failed: {}", e);
                return;
            }
        };

        info!(
            "Pending reboot event #{} found (reason: {}), waiting {}s for stabilization",
            pending.id,
            pending.reason,
            STABILIZATION_WAIT.as_secs()
        );
        tokio::time::sleep(STABILIZATION_WAIT).await;

        let mut checks = serde_json::Map::new();
        let mut all_passed = true;

        // Core units present, running, and not reporting unhealthy
        let units = self.runtime.list_units().await.unwrap_or_default();
        for name in CORE_UNITS {
            let ok = units
                .iter()
                .find(|u| u.name == *name)
                .map(|u| u.is_running() && !u.is_unhealthy())
                .unwrap_or(false);
            if !ok {
                all_passed = false;
            }
            checks.insert(format!("unit_{name}"), serde_json::json!(ok));
        }

        // Database reachable
        let db_ok = self.ledger.reachable().await;
        all_passed &= db_ok;
        checks.insert("database".into(), serde_json::json!(db_ok));

        // Telemetry live; reuse its sample for the disk check
        let sample = self.fetch_sample().await;
        let telemetry_ok = sample.is_some();
        all_passed &= telemetry_ok;
        checks.insert("telemetry".into(), serde_json::json!(telemetry_ok));

        let disk_ok = sample.as_ref().map(|s| s.disk.percent < 95.0).unwrap_or(false);
        all_passed &= disk_ok;
        checks.insert("disk".into(), serde_json::json!(disk_ok));

        // GPU queryable
        let gpu_ok = self.gpu_available().await;
        all_passed &= gpu_ok;
        checks.insert("gpu".into(), serde_json::json!(gpu_ok));

        let post_state = serde_json::json!({
            "checks": checks,
            "sample": sample,
        });
        if let Err(e) = self
            .ledger
            .complete_reboot(pending.id, post_state, all_passed)
            .await
        {
            warn!("Failed to persist reboot validation: {}", e);
        }

        let (severity, description) = if all_passed {
            (Severity::Info, "Post-reboot validation passed".to_string())
        } else {
            (
                Severity::Critical,
                "Post-reboot validation failed".to_string(),
            )
        };
        let _ = self
            .ledger
            .log_event(
                "post_reboot_validation",
                severity,
                &description,
                &format!("Validated reboot event #{}", pending.id),
                None,
                all_passed,
            )
            .await;
        info!("{}", description);
    }

    async fn fetch_sample(&self) -> Option<Sample> {
        self.client
            .get(format!("{}/metrics", self.telemetry.base_url()))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .ok()?
            .json::<Sample>()
            .await
            .ok()
    }

    async fn gpu_available(&self) -> bool {
        match self
            .client
            .get(format!("{}/api/gpu", self.telemetry.base_url()))
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response
                .json::<serde_json::Value>()
                .await
                .map(|v| v["available"] == true)
                .unwrap_or(false),
            Err(_) => false,
        }
    }
}
