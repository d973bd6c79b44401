//! Video upload wrapper — validation, storage delegation, chunk bookkeeping.
//!
//! Closes the loop between ingestion, storage, and merge: a successful
//! upload leaves one `video_chunks` row pointing at the stored URI.

use bytes::Bytes;
use sqlx::AnyPool;
use tracing::info;

use crate::db::repo;
use crate::models::NewVideoChunk;
use crate::services::storage::{StorageKind, StorageService};

#[derive(Debug, thiserror::Error)]
pub enum VideoUploadError {
    #[error("file extension not allowed: {0}")]
    BadExtension(String),
    #[error("session not found: {0}")]
    SessionNotFound(i64),
    #[error("payload too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },
    #[error("storage upload failed: {0}")]
    Storage(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone)]
pub struct VideoUploadOutcome {
    pub chunk_id: i64,
    pub uri: String,
    pub kind: StorageKind,
    pub size: usize,
}

/// Extension check against the configured allow-list. Returns the
/// lowercased extension.
pub fn validate_extension(filename: &str, allowed: &[String]) -> Result<String, VideoUploadError> {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    if ext.is_empty() || !allowed.iter().any(|allowed| *allowed == ext) {
        return Err(VideoUploadError::BadExtension(filename.to_owned()));
    }
    Ok(ext)
}

/// Size gate, applied both to the declared size hint and to the bytes
/// actually read.
pub fn validate_size(size: u64, max: u64) -> Result<(), VideoUploadError> {
    if size > max {
        return Err(VideoUploadError::TooLarge { size, max });
    }
    Ok(())
}

/// Validate, upload through the object store adapter, and record the chunk.
///
/// # Errors
///
/// Returns the §-mapped error kinds: bad extension, missing session,
/// oversize, adapter failure, or a database error recording the chunk.
#[allow(clippy::too_many_arguments)]
pub async fn upload_video_chunk(
    pool: &AnyPool,
    storage: &StorageService,
    allowed_extensions: &[String],
    max_size_bytes: u64,
    filename: &str,
    content: Bytes,
    session_id: i64,
    camera_key: &str,
    start_timestamp: f64,
    end_timestamp: f64,
) -> Result<VideoUploadOutcome, VideoUploadError> {
    validate_extension(filename, allowed_extensions)?;
    validate_size(content.len() as u64, max_size_bytes)?;

    let session = repo::get_session(pool, session_id)
        .await?
        .ok_or(VideoUploadError::SessionNotFound(session_id))?;

    let size = content.len();
    let outcome = storage.upload(content, session_id, camera_key, start_timestamp, None).await;
    if !outcome.success {
        return Err(VideoUploadError::Storage(
            outcome.error.unwrap_or_else(|| "upload failed".into()),
        ));
    }

    let chunk_id = repo::insert_video_chunk(
        pool,
        &NewVideoChunk {
            session_id,
            robot_id: session.robot_id,
            camera_key: camera_key.to_owned(),
            file_path: outcome.uri.clone(),
            start_timestamp,
            end_timestamp,
        },
    )
    .await?;

    info!(session_id, camera_key, chunk_id, uri = %outcome.uri, "video chunk recorded");
    Ok(VideoUploadOutcome { chunk_id, uri: outcome.uri, kind: outcome.kind, size })
}

#[cfg(test)]
#[path = "video_test.rs"]
mod tests;
