//! Chunk URI resolution for the merge pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::services::storage::{StorageError, StorageService};

/// Resolves stored chunk URIs to readable local files, downloading remote
/// objects into a scratch directory. The scratch directory is owned for the
/// downloader's lifetime when it was not supplied by the caller.
pub struct VideoDownloader {
    storage: Arc<StorageService>,
    temp_dir: PathBuf,
    _owned_dir: Option<tempfile::TempDir>,
}

impl VideoDownloader {
    /// # Errors
    ///
    /// Fails when no scratch directory was supplied and one cannot be
    /// created.
    pub fn new(storage: Arc<StorageService>, temp_dir: Option<PathBuf>) -> std::io::Result<Self> {
        let (temp_dir, owned) = match temp_dir {
            Some(dir) => {
                std::fs::create_dir_all(&dir)?;
                (dir, None)
            }
            None => {
                let owned = tempfile::Builder::new().prefix("teleopd_merge_").tempdir()?;
                (owned.path().to_path_buf(), Some(owned))
            }
        };
        Ok(Self { storage, temp_dir, _owned_dir: owned })
    }

    /// Resolve one chunk URI. Local paths pass through; `s3://` URIs are
    /// downloaded into the scratch directory.
    ///
    /// # Errors
    ///
    /// Propagates missing files and download failures.
    pub async fn fetch(&self, uri: &str) -> Result<PathBuf, StorageError> {
        let path = self.storage.resolve_to_local(uri, &self.temp_dir).await?;
        if uri.starts_with("s3://") {
            info!(uri, local = %path.display(), "chunk downloaded");
        }
        Ok(path)
    }
}

#[cfg(test)]
#[path = "download_test.rs"]
mod tests;
