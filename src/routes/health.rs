//! Health probes.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::models::now_epoch_secs;
use crate::state::AppState;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "healthy", "timestamp": now_epoch_secs()}))
}

pub async fn live() -> StatusCode {
    StatusCode::OK
}

/// Ready only when the frame store answers.
pub async fn ready(State(state): State<AppState>) -> Response {
    match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => (StatusCode::OK, Json(json!({"status": "ready"}))).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "not_ready", "database": e.to_string()})),
        )
            .into_response(),
    }
}

/// Full dependency report: store, cache, storage, live streams, buffers.
pub async fn detail(State(state): State<AppState>) -> Json<serde_json::Value> {
    let database_ok = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();
    let cache = state.cache.health().await;
    let storage = state.storage.status().await;
    let buffers = state.telemetry.all_metrics().await;

    Json(json!({
        "status": if database_ok { "healthy" } else { "degraded" },
        "timestamp": now_epoch_secs(),
        "database": {"healthy": database_ok},
        "cache": cache,
        "storage": storage,
        "connections": state.registry.count().await,
        "telemetry": {
            "active_buffers": buffers.len(),
            "buffers": buffers,
        },
    }))
}
