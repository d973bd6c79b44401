//! Database initialization and schema bootstrap.
//!
//! SYSTEM CONTEXT
//! ==============
//! Startup uses this module to create the shared SQLx pool and install the
//! schema before accepting stream/API traffic. The concrete backend (an
//! embedded SQLite file or a networked PostgreSQL) is selected solely by
//! `DATABASE_URL`; everything above `db` speaks `AnyPool` and portable SQL.

pub mod repo;

use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;

/// Which SQL dialect the pool talks to. Only `db` itself branches on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Sqlite,
    Postgres,
}

impl BackendKind {
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("sqlite") {
            Self::Sqlite
        } else {
            Self::Postgres
        }
    }
}

/// Initialize the connection pool and create the schema.
///
/// # Errors
///
/// Returns an error if the connection or schema bootstrap fails.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<AnyPool, sqlx::Error> {
    sqlx::any::install_default_drivers();

    let kind = BackendKind::from_url(database_url);
    // In-memory SQLite gives every connection its own database; a pool of
    // one keeps the schema and the data on the same connection.
    let max_connections = if database_url.contains(":memory:") { 1 } else { max_connections };

    let pool = AnyPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    for statement in schema_statements(kind) {
        sqlx::query(&statement).execute(&pool).await?;
    }

    Ok(pool)
}

/// Schema DDL. The only dialect split is the auto-increment primary key.
fn schema_statements(kind: BackendKind) -> Vec<String> {
    let pk = match kind {
        BackendKind::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
        BackendKind::Postgres => "BIGSERIAL PRIMARY KEY",
    };

    vec![
        "CREATE TABLE IF NOT EXISTS robots (
            robot_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            robot_type TEXT NOT NULL,
            status TEXT NOT NULL,
            last_heartbeat DOUBLE PRECISION NOT NULL
        )"
        .into(),
        format!(
            "CREATE TABLE IF NOT EXISTS sessions (
                id {pk},
                robot_id TEXT NOT NULL,
                start_time DOUBLE PRECISION NOT NULL,
                end_time DOUBLE PRECISION,
                fps BIGINT NOT NULL,
                frame_count BIGINT NOT NULL DEFAULT 0,
                meta TEXT
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS frames (
                id {pk},
                session_id BIGINT NOT NULL,
                robot_id TEXT NOT NULL,
                frame_index BIGINT NOT NULL,
                timestamp DOUBLE PRECISION NOT NULL,
                data TEXT NOT NULL
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS video_chunks (
                id {pk},
                session_id BIGINT NOT NULL,
                robot_id TEXT NOT NULL,
                camera_key TEXT NOT NULL,
                file_path TEXT NOT NULL,
                start_timestamp DOUBLE PRECISION NOT NULL,
                end_timestamp DOUBLE PRECISION NOT NULL
            )"
        ),
        "CREATE INDEX IF NOT EXISTS idx_frames_session_order ON frames (session_id, frame_index)".into(),
        "CREATE INDEX IF NOT EXISTS idx_chunks_session_start ON video_chunks (session_id, start_timestamp)".into(),
        "CREATE INDEX IF NOT EXISTS idx_sessions_robot ON sessions (robot_id, start_time)".into(),
    ]
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
