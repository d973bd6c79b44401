//! Upload endpoints: dataset sync files, video chunks, storage status.

use std::path::{Component, Path};

use axum::extract::{Multipart, State};
use axum::http::HeaderMap;
use axum::{Extension, Json};
use bytes::Bytes;
use serde_json::json;
use tracing::info;

use crate::error::{ApiError, RequestId};
use crate::services::video::{self, VideoUploadError};
use crate::state::AppState;

/// Declared-size slack: multipart boundaries and form fields ride on top of
/// the file payload itself.
const DECLARED_SIZE_SLACK: u64 = 1024 * 1024;

pub async fn storage_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = state.storage.status().await;
    Json(json!({
        "s3_configured": status.s3_configured,
        "active_backend": status.active_backend,
        "bucket": status.bucket,
    }))
}

// =============================================================================
// DATASET SYNC
// =============================================================================

/// Reject absolute paths and any `..` traversal in client-supplied parts.
pub(crate) fn safe_relative_path(raw: &str) -> bool {
    if raw.is_empty() {
        return false;
    }
    let path = Path::new(raw);
    path.components()
        .all(|part| matches!(part, Component::Normal(_) | Component::CurDir))
}

pub async fn upload_sync(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut content: Option<Bytes> = None;
    let mut dataset_name: Option<String> = None;
    let mut relative_path: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("multipart read failed: {e}"), &request_id))?
    {
        match field.name().unwrap_or_default() {
            "file" => {
                content = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::bad_request(format!("file read failed: {e}"), &request_id))?,
                );
            }
            "dataset_name" => dataset_name = field.text().await.ok(),
            "relative_path" => relative_path = field.text().await.ok(),
            _ => {}
        }
    }

    let content = content.ok_or_else(|| ApiError::unprocessable("file field required", &request_id))?;
    let dataset_name = dataset_name.ok_or_else(|| ApiError::unprocessable("dataset_name required", &request_id))?;
    let relative_path = relative_path.ok_or_else(|| ApiError::unprocessable("relative_path required", &request_id))?;

    if !safe_relative_path(&dataset_name) || !safe_relative_path(&relative_path) {
        return Err(ApiError::bad_request("path escapes the backup directory", &request_id));
    }

    let save_path = state.config.backup_dir.join(&dataset_name).join(&relative_path);
    if let Some(parent) = save_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ApiError::internal(e.to_string(), &request_id))?;
    }
    tokio::fs::write(&save_path, &content)
        .await
        .map_err(|e| ApiError::internal(e.to_string(), &request_id))?;

    info!(dataset = %dataset_name, path = %save_path.display(), size = content.len(), "sync file stored");
    Ok(Json(json!({
        "status": "success",
        "path": save_path.to_string_lossy(),
        "size": content.len(),
    })))
}

// =============================================================================
// VIDEO CHUNKS
// =============================================================================

struct VideoForm {
    filename: String,
    content: Bytes,
    session_id: i64,
    camera_key: String,
    start_timestamp: f64,
    end_timestamp: f64,
}

async fn read_video_form(multipart: &mut Multipart, request_id: &RequestId) -> Result<VideoForm, ApiError> {
    let mut filename = None;
    let mut content: Option<Bytes> = None;
    let mut session_id: Option<i64> = None;
    let mut camera_key: Option<String> = None;
    let mut start_timestamp: Option<f64> = None;
    let mut end_timestamp: Option<f64> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("multipart read failed: {e}"), request_id))?
    {
        match field.name().unwrap_or_default() {
            "file" => {
                filename = field.file_name().map(str::to_owned);
                content = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::bad_request(format!("file read failed: {e}"), request_id))?,
                );
            }
            "session_id" => session_id = field.text().await.ok().and_then(|v| v.parse().ok()),
            "camera_key" => camera_key = field.text().await.ok(),
            "start_timestamp" => start_timestamp = field.text().await.ok().and_then(|v| v.parse().ok()),
            "end_timestamp" => end_timestamp = field.text().await.ok().and_then(|v| v.parse().ok()),
            _ => {}
        }
    }

    Ok(VideoForm {
        filename: filename.ok_or_else(|| ApiError::unprocessable("file with filename required", request_id))?,
        content: content.ok_or_else(|| ApiError::unprocessable("file field required", request_id))?,
        session_id: session_id.ok_or_else(|| ApiError::unprocessable("session_id required", request_id))?,
        camera_key: camera_key
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::unprocessable("camera_key required", request_id))?,
        start_timestamp: start_timestamp
            .ok_or_else(|| ApiError::unprocessable("start_timestamp required", request_id))?,
        end_timestamp: end_timestamp.ok_or_else(|| ApiError::unprocessable("end_timestamp required", request_id))?,
    })
}

/// §-mapped status codes: bad extension 400, missing session 404, oversize
/// 413, adapter/store failure 500.
fn map_upload_error(err: VideoUploadError, request_id: &RequestId) -> ApiError {
    match err {
        VideoUploadError::BadExtension(_) => ApiError::bad_request(err.to_string(), request_id),
        VideoUploadError::SessionNotFound(_) => ApiError::not_found(err.to_string(), request_id),
        VideoUploadError::TooLarge { .. } => ApiError::payload_too_large(err.to_string(), request_id),
        VideoUploadError::Storage(_) | VideoUploadError::Database(_) => {
            ApiError::internal(err.to_string(), request_id)
        }
    }
}

pub async fn upload_video(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Declared size hint first, so oversize bodies are refused before the
    // payload is pulled into memory.
    if let Some(declared) = headers
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
    {
        if declared > state.config.video_max_size_bytes + DECLARED_SIZE_SLACK {
            return Err(ApiError::payload_too_large(
                format!("declared size {declared} exceeds limit {}", state.config.video_max_size_bytes),
                &request_id,
            ));
        }
    }

    let form = read_video_form(&mut multipart, &request_id).await?;

    let outcome = video::upload_video_chunk(
        &state.pool,
        &state.storage,
        &state.config.video_allowed_extensions,
        state.config.video_max_size_bytes,
        &form.filename,
        form.content,
        form.session_id,
        &form.camera_key,
        form.start_timestamp,
        form.end_timestamp,
    )
    .await
    .map_err(|e| map_upload_error(e, &request_id))?;

    Ok(Json(json!({
        "status": "success",
        "chunk_id": outcome.chunk_id,
        "path": outcome.uri,
        "storage_type": outcome.kind,
        "size": outcome.size,
    })))
}

#[cfg(test)]
#[path = "upload_test.rs"]
mod tests;
