//! Failure tracking and recovery-action history (C4)
//!
//! Append-only tables queried through window-bounded counters. Ladder
//! decisions always read committed state, so cooldowns and failure
//! counts survive supervisor restarts.

use crate::Ledger;
use aegis_common::{ActionType, Result};
use sqlx::Row;
use tracing::debug;

impl Ledger {
    /// Append a service failure observation
    pub async fn record_failure(
        &self,
        service_name: &str,
        failure_type: &str,
        health_status: Option<&str>,
    ) -> Result<()> {
        self.stats.record_query();
        sqlx::query(
            "INSERT INTO service_failures (service_name, failure_type, health_status)
             VALUES ($1, $2, $3)",
        )
        .bind(service_name)
        .bind(failure_type)
        .bind(health_status)
        .execute(&self.pool)
        .await
        .inspect_err(|_| self.stats.record_error())?;
        debug!("Recorded failure for {}: {}", service_name, failure_type);
        Ok(())
    }

    /// Failures for `service_name` within the last `window_minutes`
    pub async fn failure_count(&self, service_name: &str, window_minutes: i32) -> Result<i64> {
        self.stats.record_query();
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM service_failures
             WHERE service_name = $1
               AND timestamp >= NOW() - make_interval(mins => $2)",
        )
        .bind(service_name)
        .bind(window_minutes)
        .fetch_one(&self.pool)
        .await
        .inspect_err(|_| self.stats.record_error())?;
        Ok(row.get::<i64, _>("n"))
    }

    /// True iff a successful recovery action for the service lies
    /// within the cooldown window
    pub async fn is_in_cooldown(&self, service_name: &str, minutes: i32) -> Result<bool> {
        self.stats.record_query();
        let row = sqlx::query(
            "SELECT EXISTS (
                SELECT 1 FROM recovery_actions
                WHERE service_name = $1
                  AND success = true
                  AND timestamp >= NOW() - make_interval(mins => $2)
             ) AS cooling",
        )
        .bind(service_name)
        .bind(minutes)
        .fetch_one(&self.pool)
        .await
        .inspect_err(|_| self.stats.record_error())?;
        Ok(row.get::<bool, _>("cooling"))
    }

    /// CRITICAL/EMERGENCY journal entries within the window
    pub async fn critical_events_count(&self, window_minutes: i32) -> Result<i64> {
        self.stats.record_query();
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM self_healing_events
             WHERE severity IN ('CRITICAL', 'EMERGENCY')
               AND timestamp >= NOW() - make_interval(mins => $1)",
        )
        .bind(window_minutes)
        .fetch_one(&self.pool)
        .await
        .inspect_err(|_| self.stats.record_error())?;
        Ok(row.get::<i64, _>("n"))
    }

    /// Append a recovery action outcome
    #[allow(clippy::too_many_arguments)]
    pub async fn record_recovery_action(
        &self,
        action_type: ActionType,
        service_name: Option<&str>,
        reason: &str,
        success: bool,
        duration_ms: Option<i64>,
        error_message: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> Result<()> {
        self.stats.record_query();
        sqlx::query(
            "INSERT INTO recovery_actions
               (action_type, service_name, reason, success, duration_ms, error_message, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(action_type.as_str())
        .bind(service_name)
        .bind(reason)
        .bind(success)
        .bind(duration_ms)
        .bind(error_message)
        .bind(metadata)
        .execute(&self.pool)
        .await
        .inspect_err(|_| self.stats.record_error())?;
        Ok(())
    }

    /// Drop telemetry rows past retention (7 days)
    pub async fn trim_metrics(&self) -> Result<u64> {
        self.stats.record_query();
        let mut removed = 0;
        for table in [
            "metrics_cpu",
            "metrics_ram",
            "metrics_gpu",
            "metrics_temperature",
            "metrics_disk",
        ] {
            let result = sqlx::query(&format!(
                "DELETE FROM {table} WHERE timestamp < NOW() - INTERVAL '7 days'"
            ))
            .execute(&self.pool)
            .await
            .inspect_err(|_| self.stats.record_error())?;
            removed += result.rows_affected();
        }
        Ok(removed)
    }

    /// Drop ledger rows past retention (7 days)
    pub async fn trim_retention(&self) -> Result<u64> {
        self.stats.record_query();
        let mut removed = 0;
        for table in ["service_failures", "recovery_actions", "self_healing_events"] {
            let result = sqlx::query(&format!(
                "DELETE FROM {table} WHERE timestamp < NOW() - INTERVAL '7 days'"
            ))
            .execute(&self.pool)
            .await
            .inspect_err(|_| self.stats.record_error())?;
            removed += result.rows_affected();
        }
        if removed > 0 {
            debug!("Ledger retention removed {} rows", removed);
        }
        Ok(removed)
    }
}
