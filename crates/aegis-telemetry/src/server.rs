//! HTTP surface for live telemetry
//!
//! `GET /metrics` — current sample; `GET /api/gpu` — latest detailed
//! GPU snapshot; `GET /api/metrics/ping` — liveness. Handlers only
//! read shared state.

use crate::TelemetryState;
use aegis_common::Result;
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the telemetry router
pub fn create_router(state: TelemetryState) -> Router {
    Router::new()
        .route("/metrics", get(current_metrics))
        .route("/api/gpu", get(gpu_snapshot))
        .route("/api/metrics/ping", get(ping))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the router until the process shuts down
pub async fn serve(state: TelemetryState, bind_addr: &str) -> Result<()> {
    let app = create_router(state);
    info!("Telemetry server listening on {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app)
        .await
        .map_err(|e| aegis_common::Error::Network(format!("telemetry server: {e}")))?;
    Ok(())
}

async fn current_metrics(State(state): State<TelemetryState>) -> impl IntoResponse {
    let sample = state.sample.read().await.clone();
    Json(sample)
}

async fn gpu_snapshot(State(state): State<TelemetryState>) -> impl IntoResponse {
    match state.gpu.read().await.clone() {
        Some(snapshot) => Json(serde_json::json!({
            "available": true,
            "gpu": snapshot,
        })),
        None => Json(serde_json::json!({
            "available": false,
            "error": "GPU stats unavailable",
        })),
    }
}

async fn ping() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_common::Sample;
    use std::sync::Arc;
    use tokio::sync::RwLock;
    use tower::ServiceExt;

    fn test_state() -> TelemetryState {
        TelemetryState {
            sample: Arc::new(RwLock::new(Sample::empty())),
            gpu: Arc::new(RwLock::new(None)),
        }
    }

    #[tokio::test]
    async fn ping_responds_ok() {
        let app = create_router(test_state());
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/metrics/ping")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn gpu_endpoint_reports_unavailable_without_snapshot() {
        let app = create_router(test_state());
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/gpu")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["available"], false);
    }
}
