//! Operator journal (SelfHealingEvent rows)

use crate::Ledger;
use aegis_common::{Result, Severity};
use tracing::info;

impl Ledger {
    /// Append a self-healing event to the operator journal
    pub async fn log_event(
        &self,
        event_type: &str,
        severity: Severity,
        description: &str,
        action_taken: &str,
        service_name: Option<&str>,
        success: bool,
    ) -> Result<()> {
        self.stats.record_query();
        sqlx::query(
            "INSERT INTO self_healing_events
               (event_type, severity, description, action_taken, service_name, success)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(event_type)
        .bind(severity.as_str())
        .bind(description)
        .bind(action_taken)
        .bind(service_name)
        .bind(success)
        .execute(&self.pool)
        .await
        .inspect_err(|_| self.stats.record_error())?;
        info!("Event logged: {} - {}", event_type, description);
        Ok(())
    }
}
