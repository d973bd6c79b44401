//! Domain row types shared by the repository, ingestion, and merge paths.
//!
//! Timestamps are float seconds since the Unix epoch everywhere: the client
//! protocol, both database dialects, and the merge math all speak the same
//! unit, so conversion only happens at display edges.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Current wall-clock time as seconds since the Unix epoch.
#[must_use]
pub fn now_epoch_secs() -> f64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0.0;
    };
    dur.as_secs_f64()
}

/// Robot liveness as reported by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RobotState {
    Online,
    Offline,
    Error,
}

impl RobotState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Error => "error",
        }
    }
}

/// Mirror of the `robots` registry table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Robot {
    pub robot_id: String,
    pub name: String,
    pub robot_type: String,
    pub status: RobotState,
    pub last_heartbeat: f64,
}

/// Mirror of the `sessions` table. Immutable after close except for
/// `end_time`/`frame_count`, which the close path sets once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: i64,
    pub robot_id: String,
    pub start_time: f64,
    pub end_time: Option<f64>,
    pub fps: i32,
    pub frame_count: i64,
    pub meta: Option<serde_json::Value>,
}

/// One frame as buffered and batch-inserted. The `data` payload is opaque:
/// the ingestion path never inspects its shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameRecord {
    pub session_id: i64,
    pub robot_id: String,
    pub frame_index: i64,
    pub timestamp: f64,
    pub data: serde_json::Value,
}

/// One frame as read back for merge, with its row id.
#[derive(Debug, Clone)]
pub struct StoredFrame {
    pub id: i64,
    pub session_id: i64,
    pub robot_id: String,
    pub frame_index: i64,
    pub timestamp: f64,
    pub data: serde_json::Value,
}

/// Mirror of the `video_chunks` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoChunkRow {
    pub id: i64,
    pub session_id: i64,
    pub robot_id: String,
    pub camera_key: String,
    pub file_path: String,
    pub start_timestamp: f64,
    pub end_timestamp: f64,
}

/// Insert shape for `video_chunks` (id assigned by the store).
#[derive(Debug, Clone)]
pub struct NewVideoChunk {
    pub session_id: i64,
    pub robot_id: String,
    pub camera_key: String,
    pub file_path: String,
    pub start_timestamp: f64,
    pub end_timestamp: f64,
}

#[cfg(test)]
#[path = "models_test.rs"]
mod tests;
