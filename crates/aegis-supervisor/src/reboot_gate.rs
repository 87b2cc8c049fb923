//! Reboot safety gate (C7)
//!
//! Five checks stand between an escalation and the host reboot. Any
//! refusal is journaled with the reason; the system continues running.

use aegis_common::{HealingConfig, Severity};
use aegis_ledger::Ledger;
use std::time::Duration;
use tracing::{error, info, warn};

pub struct RebootGate {
    ledger: Ledger,
    healing: HealingConfig,
}

impl RebootGate {
    pub fn new(ledger: Ledger, healing: HealingConfig) -> Self {
        RebootGate { ledger, healing }
    }

    /// Run all safety checks; true means the reboot may proceed
    pub async fn check(&self, reason: &str, disk_percent: f32) -> bool {
        info!("Performing reboot safety checks...");

        // 1. Loop guard: too many recent reboots means the reboot is
        //    the bug, not the fix.
        match self.ledger.reboots_in_last_hour().await {
            Ok(count) if count >= 3 => {
                error!("Safety check failed: {} reboots in last hour", count);
                let _ = self
                    .ledger
                    .log_event(
                        "reboot_safety_check_failed",
                        Severity::Critical,
                        &format!("Too many recent reboots: {count} in last hour"),
                        "Reboot aborted - possible reboot loop",
                        None,
                        false,
                    )
                    .await;
                return false;
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to check recent reboots: {}", e),
        }

        // 2. Database must be reachable to save state.
        if !self.ledger.reachable().await {
            error!("Safety check failed: database not accessible for state-save");
            return false;
        }

        // 3. An in-progress update must never be interrupted.
        if self.update_in_progress().await {
            error!("Safety check failed: update in progress");
            return false;
        }

        // 4. A nearly-full disk may not survive the boot sequence
        //    unless the disk itself is why we are rebooting.
        if disk_percent >= 98.0 && !reason.to_lowercase().contains("disk") {
            error!(
                "Safety check failed: disk almost full ({:.1}%) and reason not disk-related",
                disk_percent
            );
            return false;
        }

        // 5. Give running workflows one grace period, then proceed.
        match self.ledger.active_workflows(5).await {
            Ok(active) if active > 0 => {
                warn!("Active workflows detected: {}. Waiting 30s...", active);
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to check active workflows: {}", e),
        }

        info!("All reboot safety checks passed");
        true
    }

    async fn update_in_progress(&self) -> bool {
        let path = &self.healing.update_state_file;
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => match serde_json::from_str::<serde_json::Value>(&raw) {
                Ok(state) => state["status"] == "in_progress",
                Err(e) => {
                    warn!("Unreadable update state file {}: {}", path.display(), e);
                    false
                }
            },
            Err(_) => false,
        }
    }
}
