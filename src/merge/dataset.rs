//! Dataset emission seam.
//!
//! The downstream training-dataset library is an external collaborator; the
//! merge engine only ever calls the `DatasetBuilder`/`EpisodeWriter`
//! surface below. The shipped filesystem writer produces a deterministic
//! single-episode layout:
//!
//! ```text
//! {output_dir}/{repo_id}/
//!     meta/info.json                  feature table, fps, robot type
//!     data/episode_000000.jsonl       one record per appended frame
//!     images/{camera}/frame_{index:06}.png
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::json;

use crate::merge::video::RgbImage;

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("png encode failed: {0}")]
    Png(#[from] png::EncodingError),
    #[error("serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("{0}")]
    Invalid(String),
}

/// One named dataset column.
#[derive(Debug, Clone, Serialize)]
pub struct Feature {
    pub name: String,
    pub dtype: String,
    pub shape: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub names: Option<Vec<String>>,
}

/// Everything the writer needs before the first frame arrives.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetSpec {
    pub repo_id: String,
    pub fps: i32,
    pub robot_type: String,
    pub features: Vec<Feature>,
}

/// One fused frame ready for emission.
#[derive(Debug, Clone)]
pub struct MergedFrame {
    pub frame_index: i64,
    pub timestamp: f64,
    pub state: Vec<f32>,
    pub action: Vec<f32>,
    /// `(camera_key, image)` pairs, present only for matched cameras.
    pub images: Vec<(String, RgbImage)>,
}

impl MergedFrame {
    #[must_use]
    pub fn has_images(&self) -> bool {
        !self.images.is_empty()
    }
}

/// Append-then-finalize sink for a single episode.
pub trait EpisodeWriter: Send {
    /// # Errors
    ///
    /// Propagates dataset-library failures; the merge is aborted on error.
    fn append(&mut self, frame: &MergedFrame) -> Result<(), DatasetError>;

    /// # Errors
    ///
    /// Propagates dataset-library failures.
    fn finalize(self: Box<Self>) -> Result<PathBuf, DatasetError>;
}

/// Creates writers rooted at an output directory.
pub trait DatasetBuilder: Send + Sync {
    /// # Errors
    ///
    /// Propagates dataset-library failures.
    fn create(&self, output_dir: &Path, spec: &DatasetSpec) -> Result<Box<dyn EpisodeWriter>, DatasetError>;
}

// =============================================================================
// FILESYSTEM WRITER
// =============================================================================

pub struct FsDatasetBuilder;

impl DatasetBuilder for FsDatasetBuilder {
    fn create(&self, output_dir: &Path, spec: &DatasetSpec) -> Result<Box<dyn EpisodeWriter>, DatasetError> {
        Ok(Box::new(FsEpisodeWriter::create(output_dir, spec)?))
    }
}

struct FsEpisodeWriter {
    root: PathBuf,
    spec: DatasetSpec,
    data: BufWriter<File>,
    frames_written: usize,
}

impl FsEpisodeWriter {
    fn create(output_dir: &Path, spec: &DatasetSpec) -> Result<Self, DatasetError> {
        if spec.repo_id.split('/').any(|part| part == "..") {
            return Err(DatasetError::Invalid(format!("repo id escapes output dir: {}", spec.repo_id)));
        }
        let root = output_dir.join(&spec.repo_id);
        std::fs::create_dir_all(root.join("meta"))?;
        std::fs::create_dir_all(root.join("data"))?;

        let data = BufWriter::new(File::create(root.join("data").join("episode_000000.jsonl"))?);
        Ok(Self { root, spec: spec.clone(), data, frames_written: 0 })
    }

    fn write_png(&self, camera: &str, frame_index: i64, image: &RgbImage) -> Result<PathBuf, DatasetError> {
        let dir = self.root.join("images").join(camera);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("frame_{frame_index:06}.png"));

        let file = File::create(&path)?;
        let mut encoder = png::Encoder::new(BufWriter::new(file), image.width, image.height);
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&image.data)?;
        Ok(path)
    }
}

impl EpisodeWriter for FsEpisodeWriter {
    fn append(&mut self, frame: &MergedFrame) -> Result<(), DatasetError> {
        let mut images = serde_json::Map::new();
        for (camera, image) in &frame.images {
            let path = self.write_png(camera, frame.frame_index, image)?;
            let rel = path.strip_prefix(&self.root).unwrap_or(&path);
            images.insert(camera.clone(), json!(rel.to_string_lossy()));
        }

        let record = json!({
            "frame_index": frame.frame_index,
            "timestamp": frame.timestamp,
            "observation.state": frame.state,
            "action": frame.action,
            "images": images,
        });
        serde_json::to_writer(&mut self.data, &record)?;
        self.data.write_all(b"\n")?;
        self.frames_written += 1;
        Ok(())
    }

    fn finalize(mut self: Box<Self>) -> Result<PathBuf, DatasetError> {
        self.data.flush()?;

        let info = json!({
            "repo_id": self.spec.repo_id,
            "fps": self.spec.fps,
            "robot_type": self.spec.robot_type,
            "total_episodes": 1,
            "total_frames": self.frames_written,
            "features": self.spec.features,
        });
        let file = File::create(self.root.join("meta").join("info.json"))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &info)?;
        Ok(self.root)
    }
}

// =============================================================================
// FEATURE SCHEMA
// =============================================================================

/// Deterministic feature table: state and action vectors named from the
/// first frame's maps in insertion order, plus one image feature per camera
/// that produced at least one frame.
#[must_use]
pub fn feature_schema(
    observation_names: &[String],
    action_names: &[String],
    camera_dims: &[(String, u32, u32)],
) -> Vec<Feature> {
    let mut features = vec![
        Feature {
            name: "observation.state".into(),
            dtype: "float32".into(),
            shape: vec![observation_names.len()],
            names: Some(observation_names.to_vec()),
        },
        Feature {
            name: "action".into(),
            dtype: "float32".into(),
            shape: vec![action_names.len()],
            names: Some(action_names.to_vec()),
        },
    ];
    for (camera, width, height) in camera_dims {
        features.push(Feature {
            name: format!("observation.images.{camera}"),
            dtype: "uint8".into(),
            shape: vec![*height as usize, *width as usize, 3],
            names: Some(vec!["height".into(), "width".into(), "channel".into()]),
        });
    }
    features
}

#[cfg(test)]
#[path = "dataset_test.rs"]
mod tests;
