//! Offline merge pipeline: fuse persisted frames with recorded video and
//! emit a single-episode dataset.
//!
//! DESIGN
//! ======
//! Per session, in order: load the session row (fail fast), load frames in
//! `frame_index` order (fail fast when empty), load chunks, prepare one
//! extractor per camera (first chunk per camera; per-camera failures drop
//! the camera, never the merge), then align/fuse/emit on the blocking pool
//! since decode and PNG writes are synchronous.
//!
//! Alignment is a direct seek: `relative = frame_ts - chunk_start`; frames
//! outside `[0, video_duration]` contribute no image for that camera but
//! are still appended to the episode.

pub mod dataset;
pub mod download;
pub mod matcher;
pub mod video;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use sqlx::AnyPool;
use tracing::{info, warn};

use crate::db::repo;
use crate::merge::dataset::{DatasetBuilder, DatasetError, DatasetSpec, FsDatasetBuilder, MergedFrame, feature_schema};
use crate::merge::download::VideoDownloader;
use crate::merge::video::{FfmpegOpener, VideoOpener, VideoSource};
use crate::models::StoredFrame;
use crate::services::storage::StorageService;

// =============================================================================
// REQUEST / OUTCOME
// =============================================================================

#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub session_id: i64,
    pub repo_id: String,
    pub output_dir: PathBuf,
    /// Used when the session row carries no usable fps.
    pub fps_default: i32,
    pub max_timestamp_diff_ms: f64,
    /// `None` merges every camera recorded for the session.
    pub camera_keys: Option<Vec<String>>,
    pub download_temp_dir: Option<PathBuf>,
}

impl MergeRequest {
    #[must_use]
    pub fn new(session_id: i64, repo_id: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            session_id,
            repo_id: repo_id.into(),
            output_dir: output_dir.into(),
            fps_default: 30,
            max_timestamp_diff_ms: 50.0,
            camera_keys: None,
            download_temp_dir: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub success: bool,
    pub total_frames: usize,
    pub matched_frames: usize,
    pub skipped_frames: usize,
    pub cameras: Vec<String>,
    pub output_path: String,
    pub duration_sec: f64,
    pub error: Option<String>,
}

impl MergeOutcome {
    fn failure(error: String, duration_sec: f64) -> Self {
        Self {
            success: false,
            total_frames: 0,
            matched_frames: 0,
            skipped_frames: 0,
            cameras: Vec::new(),
            output_path: String::new(),
            duration_sec,
            error: Some(error),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("session not found: {0}")]
    SessionNotFound(i64),
    #[error("no frames recorded for session {0}")]
    NoFrames(i64),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("scratch directory error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("merge task failed: {0}")]
    Task(String),
}

// =============================================================================
// ENGINE
// =============================================================================

struct PreparedCamera {
    camera_key: String,
    start_timestamp: f64,
    source: Box<dyn VideoSource>,
}

pub struct MergeEngine {
    pool: AnyPool,
    storage: Arc<StorageService>,
    opener: Arc<dyn VideoOpener>,
    builder: Arc<dyn DatasetBuilder>,
}

impl MergeEngine {
    #[must_use]
    pub fn new(pool: AnyPool, storage: Arc<StorageService>) -> Self {
        Self::with_components(pool, storage, Arc::new(FfmpegOpener), Arc::new(FsDatasetBuilder))
    }

    #[must_use]
    pub fn with_components(
        pool: AnyPool,
        storage: Arc<StorageService>,
        opener: Arc<dyn VideoOpener>,
        builder: Arc<dyn DatasetBuilder>,
    ) -> Self {
        Self { pool, storage, opener, builder }
    }

    /// Run one merge. Fatal problems come back as `success = false` with
    /// `error` populated; this never panics or returns `Err`.
    pub async fn run(&self, request: MergeRequest) -> MergeOutcome {
        let started = Instant::now();
        match self.run_inner(&request).await {
            Ok(mut outcome) => {
                outcome.duration_sec = started.elapsed().as_secs_f64();
                info!(
                    session_id = request.session_id,
                    total = outcome.total_frames,
                    matched = outcome.matched_frames,
                    skipped = outcome.skipped_frames,
                    output = %outcome.output_path,
                    "merge finished"
                );
                outcome
            }
            Err(e) => {
                warn!(session_id = request.session_id, error = %e, "merge failed");
                MergeOutcome::failure(e.to_string(), started.elapsed().as_secs_f64())
            }
        }
    }

    async fn run_inner(&self, request: &MergeRequest) -> Result<MergeOutcome, MergeError> {
        let session = repo::get_session(&self.pool, request.session_id)
            .await?
            .ok_or(MergeError::SessionNotFound(request.session_id))?;

        let frames = repo::frames_for_session(&self.pool, request.session_id).await?;
        if frames.is_empty() {
            return Err(MergeError::NoFrames(request.session_id));
        }

        let chunks =
            repo::video_chunks_for_session(&self.pool, request.session_id, request.camera_keys.as_deref()).await?;

        let cameras = self.prepare_extractors(&chunks, request.download_temp_dir.clone()).await?;
        let camera_names: Vec<String> = cameras.iter().map(|c| c.camera_key.clone()).collect();

        let fps = if session.fps > 0 { session.fps } else { request.fps_default };
        let spec_seed = SpecSeed {
            repo_id: request.repo_id.clone(),
            fps,
            robot_type: session.robot_id.clone(),
            output_dir: request.output_dir.clone(),
        };

        let builder = self.builder.clone();
        let total = frames.len();
        let (matched, skipped, output_path) =
            tokio::task::spawn_blocking(move || fuse_and_emit(frames, cameras, &spec_seed, builder.as_ref()))
                .await
                .map_err(|e| MergeError::Task(e.to_string()))??;

        Ok(MergeOutcome {
            success: true,
            total_frames: total,
            matched_frames: matched,
            skipped_frames: skipped,
            cameras: camera_names,
            output_path: output_path.to_string_lossy().into_owned(),
            duration_sec: 0.0,
            error: None,
        })
    }

    /// One extractor per distinct camera, first chunk wins. A failing
    /// download or open drops that camera and the merge continues.
    async fn prepare_extractors(
        &self,
        chunks: &[crate::models::VideoChunkRow],
        download_temp_dir: Option<PathBuf>,
    ) -> Result<Vec<PreparedCamera>, MergeError> {
        let mut prepared: Vec<PreparedCamera> = Vec::new();
        if chunks.is_empty() {
            return Ok(prepared);
        }

        let downloader = VideoDownloader::new(self.storage.clone(), download_temp_dir)?;
        for chunk in chunks {
            if prepared.iter().any(|c| c.camera_key == chunk.camera_key) {
                continue;
            }

            let local_path = match downloader.fetch(&chunk.file_path).await {
                Ok(path) => path,
                Err(e) => {
                    warn!(camera = %chunk.camera_key, path = %chunk.file_path, error = %e, "chunk fetch failed; camera dropped");
                    continue;
                }
            };

            let opener = self.opener.clone();
            let opened = tokio::task::spawn_blocking(move || opener.open(&local_path))
                .await
                .map_err(|e| MergeError::Task(e.to_string()))?;
            match opened {
                Ok(source) => {
                    info!(
                        camera = %chunk.camera_key,
                        fps = source.fps(),
                        frames = source.frame_count(),
                        "extractor ready"
                    );
                    prepared.push(PreparedCamera {
                        camera_key: chunk.camera_key.clone(),
                        start_timestamp: chunk.start_timestamp,
                        source,
                    });
                }
                Err(e) => {
                    warn!(camera = %chunk.camera_key, error = %e, "video open failed; camera dropped");
                }
            }
        }
        Ok(prepared)
    }
}

struct SpecSeed {
    repo_id: String,
    fps: i32,
    robot_type: String,
    output_dir: PathBuf,
}

/// Blocking stage: align every frame against every prepared camera, derive
/// the feature table, and stream the episode through the dataset seam.
fn fuse_and_emit(
    frames: Vec<StoredFrame>,
    mut cameras: Vec<PreparedCamera>,
    seed: &SpecSeed,
    builder: &dyn DatasetBuilder,
) -> Result<(usize, usize, PathBuf), MergeError> {
    let mut merged: Vec<MergedFrame> = Vec::with_capacity(frames.len());
    let mut camera_dims: Vec<(String, u32, u32)> = Vec::new();

    for frame in &frames {
        let mut images = Vec::new();
        for camera in &mut cameras {
            let Some(image) = extract_for_camera(camera, frame.timestamp) else {
                continue;
            };
            if !camera_dims.iter().any(|(name, _, _)| *name == camera.camera_key) {
                camera_dims.push((camera.camera_key.clone(), image.width, image.height));
            }
            images.push((camera.camera_key.clone(), image));
        }

        merged.push(MergedFrame {
            frame_index: frame.frame_index,
            timestamp: frame.timestamp,
            state: float_values(&frame.data, "observation"),
            action: float_values(&frame.data, "action"),
            images,
        });
    }

    let matched = merged.iter().filter(|f| f.has_images()).count();
    let skipped = merged.len() - matched;

    // The first frame's maps define the schema for the session.
    let observation_names = key_names(&frames[0].data, "observation");
    let action_names = key_names(&frames[0].data, "action");
    let spec = DatasetSpec {
        repo_id: seed.repo_id.clone(),
        fps: seed.fps,
        robot_type: seed.robot_type.clone(),
        features: feature_schema(&observation_names, &action_names, &camera_dims),
    };

    let mut writer = builder.create(&seed.output_dir, &spec)?;
    for frame in &merged {
        writer.append(frame)?;
    }
    let output_path = writer.finalize()?;

    Ok((matched, skipped, output_path))
}

/// Seek one camera for one frame timestamp. Out-of-range or decode trouble
/// yields no image.
fn extract_for_camera(camera: &mut PreparedCamera, frame_timestamp: f64) -> Option<crate::merge::video::RgbImage> {
    let relative = frame_timestamp - camera.start_timestamp;
    if relative < 0.0 || relative > camera.source.duration_secs() {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    let frame_idx = (relative * camera.source.fps()).floor() as i64;
    match camera.source.frame_at(frame_idx) {
        Ok(image) => image,
        Err(e) => {
            warn!(camera = %camera.camera_key, frame_idx, error = %e, "frame decode failed");
            None
        }
    }
}

/// Values of a payload sub-map in its own insertion order, as f32.
fn float_values(data: &serde_json::Value, key: &str) -> Vec<f32> {
    data.get(key)
        .and_then(serde_json::Value::as_object)
        .map(|map| {
            #[allow(clippy::cast_possible_truncation)]
            map.values().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect()
        })
        .unwrap_or_default()
}

/// Keys of a payload sub-map in insertion order.
fn key_names(data: &serde_json::Value, key: &str) -> Vec<String> {
    data.get(key)
        .and_then(serde_json::Value::as_object)
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
