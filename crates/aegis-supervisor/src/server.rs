//! Supervisor health endpoint
//!
//! `GET /health` reads the heartbeat file; a stale heartbeat returns
//! 503 so the container health probe restarts the supervisor. A small
//! plain-text `/metrics` mirrors the same reading as gauges.

use crate::heartbeat;
use aegis_common::{HealingConfig, Result};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct HealthServerState {
    pub healing: Arc<HealingConfig>,
}

pub fn create_router(state: HealthServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

pub async fn serve(state: HealthServerState, bind_addr: &str) -> Result<()> {
    let app = create_router(state);
    info!("Heartbeat health server listening on {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app)
        .await
        .map_err(|e| aegis_common::Error::Network(format!("health server: {e}")))?;
    Ok(())
}

async fn health(State(state): State<HealthServerState>) -> impl IntoResponse {
    let status = heartbeat::check(
        &state.healing.heartbeat_file,
        state.healing.heartbeat_max_age_secs,
        state.healing.interval_secs,
    )
    .await;
    let code = if status.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

async fn metrics(State(state): State<HealthServerState>) -> impl IntoResponse {
    let status = heartbeat::check(
        &state.healing.heartbeat_file,
        state.healing.heartbeat_max_age_secs,
        state.healing.interval_secs,
    )
    .await;
    let mut output = String::new();
    output.push_str(&format!(
        "aegis_supervisor_healthy {}\n",
        if status.healthy { 1 } else { 0 }
    ));
    if let Some(age) = status.seconds_since_heartbeat {
        output.push_str(&format!("aegis_supervisor_seconds_since_heartbeat {age:.2}\n"));
    }
    output.push_str(&format!(
        "aegis_supervisor_check_count {}\n",
        status.check_count
    ));
    ([("content-type", "text/plain; charset=utf-8")], output)
}
