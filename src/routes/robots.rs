//! Robot listing and per-robot status.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde_json::json;

use crate::db::repo;
use crate::error::{ApiError, RequestId};
use crate::state::AppState;

/// Every robot that ever opened a session, plus the live connection count.
pub async fn list_robots(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let robots = repo::distinct_robot_ids(&state.pool)
        .await
        .map_err(|e| ApiError::internal(e.to_string(), &request_id))?;

    Ok(Json(json!({
        "robots": robots,
        "count": robots.len(),
        "active_connections": state.registry.count().await,
    })))
}

/// Cache-first robot status with recent session history. 404 for robots
/// that never connected.
pub async fn robot_status(
    State(state): State<AppState>,
    Path(robot_id): Path<String>,
    Extension(request_id): Extension<RequestId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let cached = state.cache.get(&robot_id).await;
    let sessions = repo::recent_sessions(&state.pool, &robot_id, 10)
        .await
        .map_err(|e| ApiError::internal(e.to_string(), &request_id))?;

    if cached.is_none() && sessions.is_empty() {
        return Err(ApiError::not_found(format!("robot not found: {robot_id}"), &request_id));
    }

    let recent: Vec<serde_json::Value> = sessions
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "start_time": s.start_time,
                "end_time": s.end_time,
                "fps": s.fps,
                "frame_count": s.frame_count,
            })
        })
        .collect();

    Ok(Json(json!({
        "robot_id": robot_id,
        "online": cached.is_some(),
        "cached_status": cached,
        "total_sessions": sessions.len(),
        "recent_sessions": recent,
    })))
}
