//! Heartbeat file and staleness check
//!
//! The loop writes `{timestamp, check_count, last_action}` each cycle;
//! the health endpoint reads the file back and reports unhealthy when
//! the heartbeat is older than the configured maximum age.

use aegis_common::{Heartbeat, Result};
use chrono::Utc;
use serde::Serialize;
use std::path::Path;
use tracing::warn;

/// What the `/health` endpoint returns
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub status: String,
    pub seconds_since_heartbeat: Option<f64>,
    pub check_count: u64,
    pub last_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Write the heartbeat record for the current cycle
pub async fn write(path: &Path, check_count: u64, last_action: Option<String>) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }
    let heartbeat = Heartbeat {
        timestamp: Utc::now(),
        check_count,
        last_action,
    };
    tokio::fs::write(path, serde_json::to_vec(&heartbeat)?).await?;
    Ok(())
}

/// Evaluate heartbeat freshness. `interval_secs` is the expected cycle
/// period; up to twice that still counts as healthy, older than
/// `max_age_secs` is unhealthy.
pub async fn check(path: &Path, max_age_secs: u64, interval_secs: u64) -> HealthStatus {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) => {
            return HealthStatus {
                healthy: false,
                status: "unhealthy".into(),
                seconds_since_heartbeat: None,
                check_count: 0,
                last_action: None,
                reason: Some(format!("Heartbeat file unreadable: {e}")),
            }
        }
    };

    let heartbeat: Heartbeat = match serde_json::from_str(&raw) {
        Ok(hb) => hb,
        Err(e) => {
            warn!("Malformed heartbeat file: {}", e);
            return HealthStatus {
                healthy: false,
                status: "unhealthy".into(),
                seconds_since_heartbeat: None,
                check_count: 0,
                last_action: None,
                reason: Some(format!("Malformed heartbeat file: {e}")),
            };
        }
    };

    let age = (Utc::now() - heartbeat.timestamp)
        .to_std()
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);

    if age > max_age_secs as f64 {
        return HealthStatus {
            healthy: false,
            status: "unhealthy".into(),
            seconds_since_heartbeat: Some(age),
            check_count: heartbeat.check_count,
            last_action: heartbeat.last_action,
            reason: Some(format!("Heartbeat too old: {age:.1}s > {max_age_secs}s")),
        };
    }

    let status = if age < (interval_secs * 2) as f64 {
        "healthy"
    } else {
        "degraded"
    };
    HealthStatus {
        healthy: true,
        status: status.into(),
        seconds_since_heartbeat: Some(age),
        check_count: heartbeat.check_count,
        last_action: heartbeat.last_action,
        reason: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_heartbeat_is_healthy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heartbeat.json");
        write(&path, 42, Some("service_restart".into()))
            .await
            .unwrap();

        let status = check(&path, 60, 10).await;
        assert!(status.healthy);
        assert_eq!(status.status, "healthy");
        assert_eq!(status.check_count, 42);
        assert_eq!(status.last_action.as_deref(), Some("service_restart"));
    }

    #[tokio::test]
    async fn missing_file_is_unhealthy() {
        let dir = tempfile::tempdir().unwrap();
        let status = check(&dir.path().join("nope.json"), 60, 10).await;
        assert!(!status.healthy);
        assert!(status.reason.unwrap().contains("unreadable"));
    }

    #[tokio::test]
    async fn stale_heartbeat_is_unhealthy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heartbeat.json");
        let stale = Heartbeat {
            timestamp: Utc::now() - chrono::Duration::seconds(120),
            check_count: 7,
            last_action: None,
        };
        tokio::fs::write(&path, serde_json::to_vec(&stale).unwrap())
            .await
            .unwrap();

        let status = check(&path, 60, 10).await;
        assert!(!status.healthy);
        assert!(status.reason.unwrap().contains("too old"));
    }
}
