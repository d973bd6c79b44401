//! Process-wide configuration.
//!
//! DESIGN
//! ======
//! Every tunable is read from the environment exactly once at startup and
//! collected into an immutable `Config` that is passed through construction.
//! Nothing below this module touches `std::env`.

use std::path::PathBuf;

const DEFAULT_DATABASE_URL: &str = "sqlite://teleop.db?mode=rwc";
const DEFAULT_AWS_REGION: &str = "ap-northeast-2";
const DEFAULT_MULTIPART_THRESHOLD: usize = 8 * 1024 * 1024;
const DEFAULT_MULTIPART_CHUNK_SIZE: usize = 8 * 1024 * 1024;
const DEFAULT_VIDEO_EXTENSIONS: &str = "mp4,avi,mov,webm";
const DEFAULT_VIDEO_MAX_SIZE_MB: u64 = 500;
const DEFAULT_BACKUP_DIR: &str = "./backup";
const DEFAULT_WS_BUFFER_SIZE: usize = 60;
const DEFAULT_CACHE_TTL_SECS: f64 = 30.0;
const DEFAULT_SESSION_FPS: i32 = 60;
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

/// Parse an environment variable, falling back to `default` when the
/// variable is unset or unparsable.
pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Immutable record of process tunables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub port: u16,

    pub redis_url: Option<String>,
    pub cache_ttl_secs: f64,

    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_region: String,
    pub s3_bucket: Option<String>,
    pub s3_endpoint_url: Option<String>,
    pub multipart_threshold: usize,
    pub multipart_chunk_size: usize,

    pub video_allowed_extensions: Vec<String>,
    pub video_max_size_bytes: u64,
    pub backup_dir: PathBuf,

    pub ws_buffer_size: usize,
    pub session_fps: i32,
    pub api_key: Option<String>,
}

impl Config {
    /// Collect configuration from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            database_url: env_opt("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.into()),
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            port: env_parse("PORT", DEFAULT_PORT),
            redis_url: env_opt("REDIS_URL"),
            cache_ttl_secs: env_parse("CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS),
            aws_access_key_id: env_opt("AWS_ACCESS_KEY_ID"),
            aws_secret_access_key: env_opt("AWS_SECRET_ACCESS_KEY"),
            aws_region: env_opt("AWS_REGION").unwrap_or_else(|| DEFAULT_AWS_REGION.into()),
            s3_bucket: env_opt("S3_BUCKET_NAME"),
            s3_endpoint_url: env_opt("S3_ENDPOINT_URL"),
            multipart_threshold: env_parse("S3_MULTIPART_THRESHOLD", DEFAULT_MULTIPART_THRESHOLD),
            multipart_chunk_size: env_parse("S3_MULTIPART_CHUNK_SIZE", DEFAULT_MULTIPART_CHUNK_SIZE),
            video_allowed_extensions: parse_extensions(
                &env_opt("VIDEO_ALLOWED_EXTENSIONS").unwrap_or_else(|| DEFAULT_VIDEO_EXTENSIONS.into()),
            ),
            video_max_size_bytes: env_parse("VIDEO_MAX_SIZE_MB", DEFAULT_VIDEO_MAX_SIZE_MB) * 1024 * 1024,
            backup_dir: PathBuf::from(env_opt("BACKUP_DIR").unwrap_or_else(|| DEFAULT_BACKUP_DIR.into())),
            ws_buffer_size: env_parse("WS_BUFFER_SIZE", DEFAULT_WS_BUFFER_SIZE),
            session_fps: DEFAULT_SESSION_FPS,
            api_key: env_opt("API_KEY"),
        }
    }

    /// Remote storage is usable only with credentials and a bucket.
    #[must_use]
    pub fn s3_configured(&self) -> bool {
        self.aws_access_key_id.is_some() && self.aws_secret_access_key.is_some() && self.s3_bucket.is_some()
    }

    /// Defaults suitable for unit tests: SQLite in memory, no remote backends.
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            database_url: "sqlite::memory:".into(),
            db_max_connections: 1,
            port: 0,
            redis_url: None,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: DEFAULT_AWS_REGION.into(),
            s3_bucket: None,
            s3_endpoint_url: None,
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            multipart_chunk_size: DEFAULT_MULTIPART_CHUNK_SIZE,
            video_allowed_extensions: parse_extensions(DEFAULT_VIDEO_EXTENSIONS),
            video_max_size_bytes: DEFAULT_VIDEO_MAX_SIZE_MB * 1024 * 1024,
            backup_dir: PathBuf::from("./backup"),
            ws_buffer_size: DEFAULT_WS_BUFFER_SIZE,
            session_fps: DEFAULT_SESSION_FPS,
            api_key: None,
        }
    }
}

/// Split a comma-separated extension list, lowercased, empty entries dropped.
fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
