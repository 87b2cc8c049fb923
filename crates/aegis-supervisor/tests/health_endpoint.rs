//! Heartbeat file and health endpoint behavior end to end: a fresh
//! heartbeat answers 200, a stale or missing one answers 503.

use aegis_common::HealingConfig;
use aegis_supervisor::heartbeat;
use aegis_supervisor::server::{create_router, HealthServerState};
use std::sync::Arc;
use tower::ServiceExt;

fn healing_config(heartbeat_file: std::path::PathBuf) -> HealingConfig {
    HealingConfig {
        interval_secs: 10,
        enabled: true,
        reboot_enabled: false,
        failure_window_minutes: 10,
        critical_window_minutes: 30,
        max_failures_in_window: 3,
        max_critical_events: 3,
        heartbeat_file,
        heartbeat_port: 0,
        heartbeat_max_age_secs: 60,
        update_state_file: "/nonexistent/update_state.json".into(),
        log_prune_path: "/nonexistent/logs".into(),
    }
}

async fn get(router: axum::Router, path: &str) -> (axum::http::StatusCode, serde_json::Value) {
    let response = router
        .oneshot(
            axum::http::Request::builder()
                .uri(path)
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

#[tokio::test]
async fn fresh_heartbeat_returns_ok() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("heartbeat.json");
    heartbeat::write(&path, 12, Some("disk_cleanup".into()))
        .await
        .unwrap();

    let state = HealthServerState {
        healing: Arc::new(healing_config(path)),
    };
    let (status, body) = get(create_router(state), "/health").await;

    assert_eq!(status, axum::http::StatusCode::OK);
    assert_eq!(body["healthy"], true);
    assert_eq!(body["check_count"], 12);
    assert_eq!(body["last_action"], "disk_cleanup");
}

#[tokio::test]
async fn missing_heartbeat_returns_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let state = HealthServerState {
        healing: Arc::new(healing_config(dir.path().join("missing.json"))),
    };
    let (status, body) = get(create_router(state), "/health").await;

    assert_eq!(status, axum::http::StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["healthy"], false);
}

#[tokio::test]
async fn metrics_endpoint_renders_gauges() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("heartbeat.json");
    heartbeat::write(&path, 3, None).await.unwrap();

    let state = HealthServerState {
        healing: Arc::new(healing_config(path)),
    };
    let response = create_router(state)
        .oneshot(
            axum::http::Request::builder()
                .uri("/metrics")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("aegis_supervisor_healthy 1"));
    assert!(text.contains("aegis_supervisor_check_count 3"));
}
