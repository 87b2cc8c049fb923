//! Reboot event rows and the queries behind the safety gate

use crate::Ledger;
use aegis_common::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;

/// A persisted reboot event
#[derive(Debug, Clone)]
pub struct RebootEvent {
    pub id: i64,
    pub reason: String,
    pub pre_reboot_state: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl Ledger {
    /// Insert the pre-reboot snapshot row; post-reboot validation
    /// finds it by `reboot_completed = false`.
    pub async fn save_reboot_state(
        &self,
        reason: &str,
        pre_state: serde_json::Value,
    ) -> Result<i64> {
        self.stats.record_query();
        let row = sqlx::query(
            "INSERT INTO reboot_events (reason, pre_reboot_state, reboot_completed)
             VALUES ($1, $2, false)
             RETURNING id",
        )
        .bind(reason)
        .bind(pre_state)
        .fetch_one(&self.pool)
        .await
        .inspect_err(|_| self.stats.record_error())?;
        Ok(row.get::<i64, _>("id"))
    }

    /// The most recent unfinished reboot row, if any
    pub async fn pending_reboot(&self) -> Result<Option<RebootEvent>> {
        self.stats.record_query();
        let row = sqlx::query(
            "SELECT id, reason, pre_reboot_state, timestamp
             FROM reboot_events
             WHERE reboot_completed = false
             ORDER BY timestamp DESC
             LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .inspect_err(|_| self.stats.record_error())?;
        Ok(row.map(|r| RebootEvent {
            id: r.get("id"),
            reason: r.get("reason"),
            pre_reboot_state: r.get("pre_reboot_state"),
            timestamp: r.get("timestamp"),
        }))
    }

    /// Persist the validation outcome into the reboot row
    pub async fn complete_reboot(
        &self,
        id: i64,
        post_state: serde_json::Value,
        validation_passed: bool,
    ) -> Result<()> {
        self.stats.record_query();
        sqlx::query(
            "UPDATE reboot_events
             SET reboot_completed = true, post_reboot_state = $2, validation_passed = $3
             WHERE id = $1",
        )
        .bind(id)
        .bind(post_state)
        .bind(validation_passed)
        .execute(&self.pool)
        .await
        .inspect_err(|_| self.stats.record_error())?;
        Ok(())
    }

    /// Reboot rows within the last hour (loop guard)
    pub async fn reboots_in_last_hour(&self) -> Result<i64> {
        self.stats.record_query();
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM reboot_events
             WHERE timestamp >= NOW() - INTERVAL '1 hour'",
        )
        .fetch_one(&self.pool)
        .await
        .inspect_err(|_| self.stats.record_error())?;
        Ok(row.get::<i64, _>("n"))
    }

    /// Workflow rows marked running within the last `minutes`
    pub async fn active_workflows(&self, minutes: i32) -> Result<i64> {
        self.stats.record_query();
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM workflow_activity
             WHERE status = 'running'
               AND timestamp >= NOW() - make_interval(mins => $1)",
        )
        .bind(minutes)
        .fetch_one(&self.pool)
        .await
        .inspect_err(|_| self.stats.record_error())?;
        Ok(row.get::<i64, _>("n"))
    }

    /// Intended state of a store-managed app, if the unit is one
    pub async fn store_app_status(&self, container_name: &str) -> Result<Option<String>> {
        self.stats.record_query();
        let row = sqlx::query(
            "SELECT status FROM app_installations
             WHERE container_name = $1 OR app_id = $1",
        )
        .bind(container_name)
        .fetch_optional(&self.pool)
        .await
        .inspect_err(|_| self.stats.record_error())?;
        Ok(row.map(|r| r.get::<String, _>("status")))
    }
}
