//! Session listing and detail.

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use crate::db::repo;
use crate::error::{ApiError, RequestId};
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub robot_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
    Extension(request_id): Extension<RequestId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let sessions = repo::list_sessions(&state.pool, params.robot_id.as_deref(), limit, offset)
        .await
        .map_err(|e| ApiError::internal(e.to_string(), &request_id))?;

    Ok(Json(json!({
        "sessions": sessions,
        "count": sessions.len(),
        "limit": limit,
        "offset": offset,
    })))
}

pub async fn session_detail(
    State(state): State<AppState>,
    Path(session_id): Path<i64>,
    Extension(request_id): Extension<RequestId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = repo::get_session(&state.pool, session_id)
        .await
        .map_err(|e| ApiError::internal(e.to_string(), &request_id))?
        .ok_or_else(|| ApiError::not_found(format!("session not found: {session_id}"), &request_id))?;

    let frame_count = repo::count_frames(&state.pool, session_id)
        .await
        .map_err(|e| ApiError::internal(e.to_string(), &request_id))?;
    let videos = repo::video_chunks_for_session(&state.pool, session_id, None)
        .await
        .map_err(|e| ApiError::internal(e.to_string(), &request_id))?;

    Ok(Json(json!({
        "id": session.id,
        "robot_id": session.robot_id,
        "start_time": session.start_time,
        "end_time": session.end_time,
        "fps": session.fps,
        "meta": session.meta,
        "frame_count": frame_count,
        "videos": videos,
    })))
}
