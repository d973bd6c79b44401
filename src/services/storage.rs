//! Object store adapter — S3 with a local filesystem fallback.
//!
//! DESIGN
//! ======
//! One `upload` contract over two backends. Backend selection is lazy on
//! the first call and sticky for the rest of the process: if credentials
//! and a bucket are configured AND the initial handshake succeeds the
//! adapter stays remote, otherwise it is permanently demoted to local and
//! the SDK is never called again.
//!
//! The remote side sits behind the `RemoteStore` trait so the multipart
//! call pattern (create, parts 1..K in order, complete, abort-on-failure)
//! is testable without AWS.
//!
//! The adapter never leaks errors: every failure path returns
//! `success = false` with `error` populated.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

use crate::config::Config;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    S3,
    Local,
}

impl StorageKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::Local => "local",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
}

/// Snapshot handed to the progress callback after each part (or once, at
/// single-PUT / local-write completion).
#[derive(Debug, Clone, Serialize)]
pub struct UploadProgress {
    pub total_bytes: usize,
    pub uploaded_bytes: usize,
    pub parts_completed: usize,
    pub total_parts: usize,
    pub status: ProgressStatus,
    pub error: Option<String>,
}

pub type ProgressCallback = Arc<dyn Fn(&UploadProgress) + Send + Sync>;

/// Result of one upload. `uri` is an `s3://` URI or a local path.
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub success: bool,
    pub kind: StorageKind,
    pub uri: String,
    pub size: usize,
    pub elapsed_ms: f64,
    pub error: Option<String>,
}

/// Reported by `GET /upload/storage-status`.
#[derive(Debug, Clone, Serialize)]
pub struct StorageStatus {
    pub s3_configured: bool,
    /// `None` until the first upload selects a backend.
    pub active_backend: Option<StorageKind>,
    pub bucket: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("remote store error: {0}")]
    Remote(String),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("remote backend unavailable for {0}")]
    RemoteUnavailable(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// =============================================================================
// REMOTE SEAM
// =============================================================================

/// Minimal remote blob surface the adapter needs. `S3Store` implements it;
/// tests count calls through a mock.
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// Init handshake. Failing here demotes the adapter to local for good.
    async fn head_bucket(&self) -> Result<(), StorageError>;

    async fn put_object(&self, key: &str, body: Bytes) -> Result<(), StorageError>;

    /// Returns the upload id.
    async fn create_multipart(&self, key: &str) -> Result<String, StorageError>;

    /// Returns the part's ETag.
    async fn upload_part(&self, key: &str, upload_id: &str, part_number: i32, body: Bytes)
    -> Result<String, StorageError>;

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<(i32, String)>,
    ) -> Result<(), StorageError>;

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), StorageError>;

    async fn download(&self, key: &str, dest: &Path) -> Result<(), StorageError>;
}

// =============================================================================
// S3 BACKEND
// =============================================================================

#[derive(Debug, Clone)]
struct S3Settings {
    access_key_id: String,
    secret_access_key: String,
    region: String,
    bucket: String,
    endpoint_url: Option<String>,
}

pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Store {
    async fn connect(settings: &S3Settings) -> Self {
        let credentials = aws_sdk_s3::config::Credentials::new(
            settings.access_key_id.clone(),
            settings.secret_access_key.clone(),
            None,
            None,
            "teleopd-config",
        );
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &settings.endpoint_url {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let sdk_config = loader.load().await;

        // Path-style addressing for MinIO/LocalStack endpoint overrides.
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(settings.endpoint_url.is_some())
            .build();

        Self { client: aws_sdk_s3::Client::from_conf(s3_config), bucket: settings.bucket.clone() }
    }
}

fn sdk_err(e: impl std::fmt::Debug) -> StorageError {
    StorageError::Remote(format!("{e:?}"))
}

#[async_trait::async_trait]
impl RemoteStore for S3Store {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn head_bucket(&self) -> Result<(), StorageError> {
        self.client.head_bucket().bucket(&self.bucket).send().await.map_err(sdk_err)?;
        Ok(())
    }

    async fn put_object(&self, key: &str, body: Bytes) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("video/mp4")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(sdk_err)?;
        Ok(())
    }

    async fn create_multipart(&self, key: &str) -> Result<String, StorageError> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type("video/mp4")
            .send()
            .await
            .map_err(sdk_err)?;
        response
            .upload_id()
            .map(str::to_owned)
            .ok_or_else(|| StorageError::Remote("multipart upload id missing".into()))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, StorageError> {
        let response = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(sdk_err)?;
        response
            .e_tag()
            .map(str::to_owned)
            .ok_or_else(|| StorageError::Remote(format!("etag missing for part {part_number}")))
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<(i32, String)>,
    ) -> Result<(), StorageError> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .into_iter()
                    .map(|(number, etag)| CompletedPart::builder().part_number(number).e_tag(etag).build())
                    .collect(),
            ))
            .build();
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(sdk_err)?;
        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), StorageError> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(sdk_err)?;
        Ok(())
    }

    async fn download(&self, key: &str, dest: &Path) -> Result<(), StorageError> {
        let response = self.client.get_object().bucket(&self.bucket).key(key).send().await.map_err(sdk_err)?;
        let data = response.body.collect().await.map_err(sdk_err)?.into_bytes();
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &data).await?;
        Ok(())
    }
}

// =============================================================================
// ADAPTER
// =============================================================================

enum Backend {
    Remote(Arc<dyn RemoteStore>),
    Local,
}

pub struct StorageService {
    backup_dir: PathBuf,
    multipart_threshold: usize,
    multipart_chunk_size: usize,
    s3: Option<S3Settings>,
    /// Test seam: a pre-built remote candidate that still goes through the
    /// handshake-or-demote selection.
    remote_override: Option<Arc<dyn RemoteStore>>,
    backend: OnceCell<Backend>,
}

impl StorageService {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let s3 = if config.s3_configured() {
            Some(S3Settings {
                access_key_id: config.aws_access_key_id.clone().unwrap_or_default(),
                secret_access_key: config.aws_secret_access_key.clone().unwrap_or_default(),
                region: config.aws_region.clone(),
                bucket: config.s3_bucket.clone().unwrap_or_default(),
                endpoint_url: config.s3_endpoint_url.clone(),
            })
        } else {
            None
        };
        Self {
            backup_dir: config.backup_dir.clone(),
            multipart_threshold: config.multipart_threshold,
            multipart_chunk_size: config.multipart_chunk_size.max(1),
            s3,
            remote_override: None,
            backend: OnceCell::new(),
        }
    }

    /// Local-only adapter (no credentials configured).
    #[must_use]
    pub fn local_only(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            multipart_threshold: 8 * 1024 * 1024,
            multipart_chunk_size: 8 * 1024 * 1024,
            s3: None,
            remote_override: None,
            backend: OnceCell::new(),
        }
    }

    /// Adapter whose remote candidate is supplied by the caller. Selection
    /// (handshake, sticky demotion) still runs on first use.
    #[must_use]
    pub fn with_remote(
        remote: Arc<dyn RemoteStore>,
        backup_dir: impl Into<PathBuf>,
        multipart_threshold: usize,
        multipart_chunk_size: usize,
    ) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            multipart_threshold,
            multipart_chunk_size: multipart_chunk_size.max(1),
            s3: None,
            remote_override: Some(remote),
            backend: OnceCell::new(),
        }
    }

    /// Lazy, sticky backend selection.
    async fn backend(&self) -> &Backend {
        self.backend
            .get_or_init(|| async {
                let candidate: Option<Arc<dyn RemoteStore>> = if let Some(remote) = &self.remote_override {
                    Some(remote.clone())
                } else if let Some(settings) = &self.s3 {
                    Some(Arc::new(S3Store::connect(settings).await))
                } else {
                    None
                };

                match candidate {
                    Some(remote) => match remote.head_bucket().await {
                        Ok(()) => {
                            info!(bucket = remote.bucket(), "remote storage backend selected");
                            Backend::Remote(remote)
                        }
                        Err(e) => {
                            warn!(error = %e, "remote storage handshake failed; demoted to local for process lifetime");
                            Backend::Local
                        }
                    },
                    None => Backend::Local,
                }
            })
            .await
    }

    fn object_key(session_id: i64, camera_key: &str, timestamp: f64) -> String {
        format!("sessions/{session_id}/{camera_key}_{}.mp4", floor_ts(timestamp))
    }

    fn local_path(&self, session_id: i64, camera_key: &str, timestamp: f64) -> PathBuf {
        self.backup_dir
            .join("videos")
            .join(format!("{session_id}_{camera_key}_{}.mp4", floor_ts(timestamp)))
    }

    /// Upload a video payload; never errors, never panics.
    pub async fn upload(
        &self,
        content: Bytes,
        session_id: i64,
        camera_key: &str,
        timestamp: f64,
        progress: Option<ProgressCallback>,
    ) -> UploadOutcome {
        let started = Instant::now();
        let size = content.len();

        let outcome = match self.backend().await {
            Backend::Remote(remote) => {
                self.upload_remote(remote.as_ref(), content, session_id, camera_key, timestamp, progress.as_ref())
                    .await
            }
            Backend::Local => {
                self.upload_local(content, session_id, camera_key, timestamp, progress.as_ref())
                    .await
            }
        };

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        info!(
            session_id,
            camera_key,
            kind = outcome.kind.as_str(),
            size_kb = size as f64 / 1024.0,
            elapsed_ms,
            success = outcome.success,
            "video upload finished"
        );
        UploadOutcome { elapsed_ms, ..outcome }
    }

    async fn upload_remote(
        &self,
        remote: &dyn RemoteStore,
        content: Bytes,
        session_id: i64,
        camera_key: &str,
        timestamp: f64,
        progress: Option<&ProgressCallback>,
    ) -> UploadOutcome {
        let key = Self::object_key(session_id, camera_key, timestamp);
        let size = content.len();
        let uri = format!("s3://{}/{key}", remote.bucket());

        let result = if size >= self.multipart_threshold {
            self.multipart_upload(remote, &key, content, progress).await
        } else {
            let put = remote.put_object(&key, content).await;
            if put.is_ok() {
                emit_progress(
                    progress,
                    &UploadProgress {
                        total_bytes: size,
                        uploaded_bytes: size,
                        parts_completed: 0,
                        total_parts: 0,
                        status: ProgressStatus::Completed,
                        error: None,
                    },
                );
            }
            put
        };

        match result {
            Ok(()) => UploadOutcome { success: true, kind: StorageKind::S3, uri, size, elapsed_ms: 0.0, error: None },
            Err(e) => {
                error!(key, error = %e, "remote upload failed");
                emit_progress(
                    progress,
                    &UploadProgress {
                        total_bytes: size,
                        uploaded_bytes: 0,
                        parts_completed: 0,
                        total_parts: 0,
                        status: ProgressStatus::Failed,
                        error: Some(e.to_string()),
                    },
                );
                UploadOutcome {
                    success: false,
                    kind: StorageKind::S3,
                    uri: String::new(),
                    size,
                    elapsed_ms: 0.0,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Slice into `multipart_chunk_size` parts numbered from 1, upload in
    /// order, complete with the collected (PartNumber, ETag) list. Any part
    /// failure aborts the multipart upload (best effort) before surfacing.
    async fn multipart_upload(
        &self,
        remote: &dyn RemoteStore,
        key: &str,
        content: Bytes,
        progress: Option<&ProgressCallback>,
    ) -> Result<(), StorageError> {
        let size = content.len();
        let chunk = self.multipart_chunk_size;
        let total_parts = size.div_ceil(chunk);
        let upload_id = remote.create_multipart(key).await?;

        let mut parts: Vec<(i32, String)> = Vec::with_capacity(total_parts);
        for part_number in 1..=total_parts {
            let start = (part_number - 1) * chunk;
            let end = (start + chunk).min(size);
            let body = content.slice(start..end);

            #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
            let etag = match remote.upload_part(key, &upload_id, part_number as i32, body).await {
                Ok(etag) => etag,
                Err(e) => {
                    if let Err(abort_err) = remote.abort_multipart(key, &upload_id).await {
                        warn!(key, error = %abort_err, "multipart abort failed");
                    }
                    return Err(e);
                }
            };
            #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
            parts.push((part_number as i32, etag));

            emit_progress(
                progress,
                &UploadProgress {
                    total_bytes: size,
                    uploaded_bytes: end,
                    parts_completed: part_number,
                    total_parts,
                    status: ProgressStatus::Uploading,
                    error: None,
                },
            );
        }

        if let Err(e) = remote.complete_multipart(key, &upload_id, parts).await {
            if let Err(abort_err) = remote.abort_multipart(key, &upload_id).await {
                warn!(key, error = %abort_err, "multipart abort failed");
            }
            return Err(e);
        }

        emit_progress(
            progress,
            &UploadProgress {
                total_bytes: size,
                uploaded_bytes: size,
                parts_completed: total_parts,
                total_parts,
                status: ProgressStatus::Completed,
                error: None,
            },
        );
        Ok(())
    }

    async fn upload_local(
        &self,
        content: Bytes,
        session_id: i64,
        camera_key: &str,
        timestamp: f64,
        progress: Option<&ProgressCallback>,
    ) -> UploadOutcome {
        let path = self.local_path(session_id, camera_key, timestamp);
        let size = content.len();

        let result: Result<(), StorageError> = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, &content).await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                emit_progress(
                    progress,
                    &UploadProgress {
                        total_bytes: size,
                        uploaded_bytes: size,
                        parts_completed: 0,
                        total_parts: 0,
                        status: ProgressStatus::Completed,
                        error: None,
                    },
                );
                UploadOutcome {
                    success: true,
                    kind: StorageKind::Local,
                    uri: path.to_string_lossy().into_owned(),
                    size,
                    elapsed_ms: 0.0,
                    error: None,
                }
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "local video write failed");
                UploadOutcome {
                    success: false,
                    kind: StorageKind::Local,
                    uri: String::new(),
                    size,
                    elapsed_ms: 0.0,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Resolve a stored chunk URI to a readable local file, downloading from
    /// the remote backend into `dest_dir` when needed.
    ///
    /// # Errors
    ///
    /// Fails when a local file is missing, the remote backend is not active
    /// for an `s3://` URI, or the download itself fails.
    pub async fn resolve_to_local(&self, uri: &str, dest_dir: &Path) -> Result<PathBuf, StorageError> {
        if let Some((_, key)) = parse_s3_uri(uri) {
            let Backend::Remote(remote) = self.backend().await else {
                return Err(StorageError::RemoteUnavailable(uri.to_owned()));
            };
            let file_name = key.rsplit('/').next().unwrap_or(&key);
            let dest = dest_dir.join(file_name);
            remote.download(&key, &dest).await?;
            return Ok(dest);
        }

        let path = PathBuf::from(uri);
        if path.exists() {
            Ok(path)
        } else {
            Err(StorageError::NotFound(uri.to_owned()))
        }
    }

    pub async fn status(&self) -> StorageStatus {
        let active_backend = self.backend.get().map(|backend| match backend {
            Backend::Remote(_) => StorageKind::S3,
            Backend::Local => StorageKind::Local,
        });
        let bucket = match (&self.remote_override, &self.s3) {
            (Some(remote), _) => Some(remote.bucket().to_owned()),
            (None, Some(settings)) => Some(settings.bucket.clone()),
            (None, None) => None,
        };
        StorageStatus {
            s3_configured: self.s3.is_some() || self.remote_override.is_some(),
            active_backend,
            bucket,
        }
    }
}

fn emit_progress(progress: Option<&ProgressCallback>, snapshot: &UploadProgress) {
    if let Some(callback) = progress {
        callback(snapshot);
    }
}

/// Floor of a positive epoch timestamp, as used in object keys/filenames.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn floor_ts(timestamp: f64) -> i64 {
    timestamp.floor() as i64
}

/// Split `s3://bucket/key` into `(bucket, key)`.
pub(crate) fn parse_s3_uri(uri: &str) -> Option<(String, String)> {
    let rest = uri.strip_prefix("s3://")?;
    let (bucket, key) = rest.split_once('/')?;
    if bucket.is_empty() || key.is_empty() {
        return None;
    }
    Some((bucket.to_owned(), key.to_owned()))
}

#[cfg(test)]
#[path = "storage_test.rs"]
mod tests;
