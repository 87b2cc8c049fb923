//! Indexer management API
//!
//! The HTTP contract preserved for the dashboard façade: status and
//! statistics, document listing and lifecycle, scan trigger, semantic
//! search, and the BM25 rebuild endpoint.

use crate::db::ListParams;
use crate::Indexer;
use aegis_common::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

pub type ApiState = Arc<Indexer>;

pub fn create_router(indexer: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/statistics", get(statistics))
        .route("/documents", get(list_documents))
        .route("/documents/:id", get(get_document).delete(delete_document))
        .route("/documents/:id/reindex", post(reindex_document))
        .route("/documents/:id/similar", get(similar_documents))
        .route("/scan", post(trigger_scan))
        .route("/search", post(search))
        .route("/bm25/rebuild", post(rebuild_bm25))
        .layer(TraceLayer::new_for_http())
        .with_state(indexer)
}

pub async fn serve(indexer: ApiState, bind_addr: &str) -> Result<()> {
    let app = create_router(indexer);
    info!("Indexer API listening on {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app)
        .await
        .map_err(|e| aegis_common::Error::Network(format!("indexer api: {e}")))?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "document-indexer",
    }))
}

async fn status(State(indexer): State<ApiState>) -> impl IntoResponse {
    Json(indexer.status_snapshot().await)
}

async fn statistics(State(indexer): State<ApiState>) -> impl IntoResponse {
    match indexer.db.statistics().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => {
            error!("Statistics error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
    category_id: Option<i32>,
    search: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
    #[serde(default = "default_order_by")]
    order_by: String,
    #[serde(default = "default_order_dir")]
    order_dir: String,
}

fn default_limit() -> i64 {
    50
}
fn default_order_by() -> String {
    "uploaded_at".into()
}
fn default_order_dir() -> String {
    "DESC".into()
}

async fn list_documents(
    State(indexer): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let params = ListParams {
        status: query.status,
        category_id: query.category_id,
        search: query.search,
        limit: query.limit.min(100),
        offset: query.offset,
        order_by: query.order_by,
        order_dir: query.order_dir,
    };
    match indexer.db.list(&params).await {
        Ok((documents, total)) => Json(serde_json::json!({
            "documents": documents,
            "total": total,
            "limit": params.limit,
            "offset": params.offset,
        }))
        .into_response(),
        Err(e) => {
            error!("Document listing error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn get_document(
    State(indexer): State<ApiState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match indexer.db.get(id).await {
        Ok(Some(document)) => Json(document).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!("Document fetch error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn delete_document(
    State(indexer): State<ApiState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match indexer.delete_document(id).await {
        Ok(true) => Json(serde_json::json!({ "status": "deleted", "id": id })).into_response(),
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!("Document deletion error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn reindex_document(
    State(indexer): State<ApiState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match indexer.db.reset_for_reindex(id).await {
        Ok(true) => {
            info!("Document {} reset for reindexing", id);
            Json(serde_json::json!({
                "status": "pending",
                "id": id,
                "message": "Document will be reindexed on the next scan",
            }))
            .into_response()
        }
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!("Reindex reset error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn similar_documents(
    State(indexer): State<ApiState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match indexer.db.similar_documents(id).await {
        Ok(similar) => Json(serde_json::json!({ "document_id": id, "similar": similar }))
            .into_response(),
        Err(e) => {
            error!("Similarity lookup error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn trigger_scan(State(indexer): State<ApiState>) -> impl IntoResponse {
    if indexer.trigger_scan() {
        Json(serde_json::json!({ "status": "scan_started" })).into_response()
    } else {
        (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "status": "scan_already_running" })),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default = "default_top_k")]
    top_k: usize,
}

fn default_top_k() -> usize {
    10
}

async fn search(
    State(indexer): State<ApiState>,
    Json(request): Json<SearchRequest>,
) -> impl IntoResponse {
    if request.query.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "query must not be empty" })),
        )
            .into_response();
    }
    match indexer.search(&request.query, request.top_k.clamp(1, 50)).await {
        Ok(results) => Json(serde_json::json!({
            "query": request.query,
            "results": results,
        }))
        .into_response(),
        Err(e) => {
            error!("Search error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn rebuild_bm25(State(indexer): State<ApiState>) -> impl IntoResponse {
    match indexer.rebuild_bm25().await {
        Ok(count) => Json(serde_json::json!({
            "status": "rebuilt",
            "indexed_chunks": count,
        }))
        .into_response(),
        Err(e) => {
            error!("BM25 rebuild error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
