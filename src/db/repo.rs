//! Repository surface over the relational store.
//!
//! DESIGN
//! ======
//! Free functions over `AnyPool`, one per operation. Batch frame inserts go
//! out in a single round trip via `QueryBuilder::push_values`. Read queries
//! carry their required ordering here, not at call sites: frames by
//! `(session_id, frame_index)`, video chunks by `start_timestamp`.

use sqlx::{AnyPool, QueryBuilder, Row};

use crate::models::{FrameRecord, NewVideoChunk, Robot, SessionRow, StoredFrame, VideoChunkRow};

/// Write seam for the ingestion buffer. The pool implements it; tests
/// substitute an in-memory sink to count round trips.
#[async_trait::async_trait]
pub trait FrameSink: Send + Sync {
    async fn insert_frames(&self, frames: &[FrameRecord]) -> Result<(), sqlx::Error>;
}

#[async_trait::async_trait]
impl FrameSink for AnyPool {
    async fn insert_frames(&self, frames: &[FrameRecord]) -> Result<(), sqlx::Error> {
        insert_frames(self, frames).await
    }
}

// =============================================================================
// ROBOTS
// =============================================================================

/// Insert or refresh a robot registry row.
///
/// # Errors
///
/// Returns a database error if the upsert fails.
pub async fn upsert_robot(pool: &AnyPool, robot: &Robot) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO robots (robot_id, name, robot_type, status, last_heartbeat)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (robot_id) DO UPDATE SET
             status = excluded.status,
             last_heartbeat = excluded.last_heartbeat",
    )
    .bind(&robot.robot_id)
    .bind(&robot.name)
    .bind(&robot.robot_type)
    .bind(robot.status.as_str())
    .bind(robot.last_heartbeat)
    .execute(pool)
    .await?;
    Ok(())
}

/// All robot ids that ever opened a session.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn distinct_robot_ids(pool: &AnyPool) -> Result<Vec<String>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (String,)>("SELECT DISTINCT robot_id FROM sessions ORDER BY robot_id")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

// =============================================================================
// SESSIONS
// =============================================================================

/// Create a session row and return its assigned id.
///
/// # Errors
///
/// Returns a database error if the insert fails.
pub async fn create_session(
    pool: &AnyPool,
    robot_id: &str,
    fps: i32,
    start_time: f64,
    meta: Option<&serde_json::Value>,
) -> Result<i64, sqlx::Error> {
    let meta_text = meta.map(std::string::ToString::to_string);
    let row = sqlx::query(
        "INSERT INTO sessions (robot_id, start_time, fps, frame_count, meta)
         VALUES ($1, $2, $3, 0, $4)
         RETURNING id",
    )
    .bind(robot_id)
    .bind(start_time)
    .bind(i64::from(fps))
    .bind(meta_text)
    .fetch_one(pool)
    .await?;
    row.try_get::<i64, _>(0)
}

/// Close a session: stamp the end time and the final frame count.
///
/// # Errors
///
/// Returns a database error if the update fails.
pub async fn end_session(pool: &AnyPool, session_id: i64, end_time: f64, frame_count: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE sessions SET end_time = $1, frame_count = $2 WHERE id = $3")
        .bind(end_time)
        .bind(frame_count)
        .bind(session_id)
        .execute(pool)
        .await?;
    Ok(())
}

fn session_from_tuple(row: (i64, String, f64, Option<f64>, i64, i64, Option<String>)) -> SessionRow {
    let (id, robot_id, start_time, end_time, fps, frame_count, meta) = row;
    SessionRow {
        id,
        robot_id,
        start_time,
        end_time,
        fps: i32::try_from(fps).unwrap_or(0),
        frame_count,
        meta: meta.and_then(|m| serde_json::from_str(&m).ok()),
    }
}

const SESSION_COLUMNS: &str = "id, robot_id, start_time, end_time, fps, frame_count, meta";

/// Look up one session.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn get_session(pool: &AnyPool, session_id: i64) -> Result<Option<SessionRow>, sqlx::Error> {
    let row = sqlx::query_as::<_, (i64, String, f64, Option<f64>, i64, i64, Option<String>)>(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"
    ))
    .bind(session_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(session_from_tuple))
}

/// Newest-first session listing with optional robot filter.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn list_sessions(
    pool: &AnyPool,
    robot_id: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<Vec<SessionRow>, sqlx::Error> {
    let rows = if let Some(robot_id) = robot_id {
        sqlx::query_as::<_, (i64, String, f64, Option<f64>, i64, i64, Option<String>)>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE robot_id = $1
             ORDER BY start_time DESC LIMIT $2 OFFSET $3"
        ))
        .bind(robot_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?
    } else {
        sqlx::query_as::<_, (i64, String, f64, Option<f64>, i64, i64, Option<String>)>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY start_time DESC LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?
    };
    Ok(rows.into_iter().map(session_from_tuple).collect())
}

// =============================================================================
// FRAMES
// =============================================================================

/// Bulk-insert a frame batch in one round trip.
///
/// # Errors
///
/// Returns a database error if the insert fails.
pub async fn insert_frames(pool: &AnyPool, frames: &[FrameRecord]) -> Result<(), sqlx::Error> {
    if frames.is_empty() {
        return Ok(());
    }

    let mut builder: QueryBuilder<sqlx::Any> =
        QueryBuilder::new("INSERT INTO frames (session_id, robot_id, frame_index, timestamp, data) ");
    builder.push_values(frames, |mut b, frame| {
        b.push_bind(frame.session_id)
            .push_bind(&frame.robot_id)
            .push_bind(frame.frame_index)
            .push_bind(frame.timestamp)
            .push_bind(frame.data.to_string());
    });
    builder.build().execute(pool).await?;
    Ok(())
}

/// Number of persisted frames for a session.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn count_frames(pool: &AnyPool, session_id: i64) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM frames WHERE session_id = $1")
        .bind(session_id)
        .fetch_one(pool)
        .await
}

/// All frames of a session in `frame_index` order.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn frames_for_session(pool: &AnyPool, session_id: i64) -> Result<Vec<StoredFrame>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (i64, i64, String, i64, f64, String)>(
        "SELECT id, session_id, robot_id, frame_index, timestamp, data
         FROM frames WHERE session_id = $1
         ORDER BY frame_index ASC",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, session_id, robot_id, frame_index, timestamp, data)| StoredFrame {
            id,
            session_id,
            robot_id,
            frame_index,
            timestamp,
            data: serde_json::from_str(&data).unwrap_or(serde_json::Value::Null),
        })
        .collect())
}

// =============================================================================
// VIDEO CHUNKS
// =============================================================================

/// Record a successful video upload.
///
/// # Errors
///
/// Returns a database error if the insert fails.
pub async fn insert_video_chunk(pool: &AnyPool, chunk: &NewVideoChunk) -> Result<i64, sqlx::Error> {
    let row = sqlx::query(
        "INSERT INTO video_chunks (session_id, robot_id, camera_key, file_path, start_timestamp, end_timestamp)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING id",
    )
    .bind(chunk.session_id)
    .bind(&chunk.robot_id)
    .bind(&chunk.camera_key)
    .bind(&chunk.file_path)
    .bind(chunk.start_timestamp)
    .bind(chunk.end_timestamp)
    .fetch_one(pool)
    .await?;
    row.try_get::<i64, _>(0)
}

/// Chunks of a session ordered by start timestamp, optionally restricted to
/// a camera set.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn video_chunks_for_session(
    pool: &AnyPool,
    session_id: i64,
    camera_keys: Option<&[String]>,
) -> Result<Vec<VideoChunkRow>, sqlx::Error> {
    let mut builder: QueryBuilder<sqlx::Any> = QueryBuilder::new(
        "SELECT id, session_id, robot_id, camera_key, file_path, start_timestamp, end_timestamp
         FROM video_chunks WHERE session_id = ",
    );
    builder.push_bind(session_id);

    if let Some(keys) = camera_keys {
        builder.push(" AND camera_key IN (");
        {
            let mut separated = builder.separated(", ");
            for key in keys {
                separated.push_bind(key);
            }
        }
        builder.push(")");
    }
    builder.push(" ORDER BY start_timestamp ASC");

    let rows = builder
        .build_query_as::<(i64, i64, String, String, String, f64, f64)>()
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(
            |(id, session_id, robot_id, camera_key, file_path, start_timestamp, end_timestamp)| VideoChunkRow {
                id,
                session_id,
                robot_id,
                camera_key,
                file_path,
                start_timestamp,
                end_timestamp,
            },
        )
        .collect())
}

/// Convenience used by tests and the robot status route.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn recent_sessions(pool: &AnyPool, robot_id: &str, limit: i64) -> Result<Vec<SessionRow>, sqlx::Error> {
    list_sessions(pool, Some(robot_id), limit, 0).await
}

#[cfg(test)]
#[path = "repo_test.rs"]
mod tests;
