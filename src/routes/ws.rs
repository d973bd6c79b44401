//! WebSocket ingestion stream — `/ws/log/{robot_id}`.
//!
//! DESIGN
//! ======
//! One task per stream, one session per stream lifetime.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade; when auth is enabled a bad key closes 4003, a missing key
//!    closes 4001 (the codes are delivered post-upgrade so clients see a
//!    close frame, not an HTTP error).
//! 2. Open: upsert the robot, create the session row, register with the
//!    connection registry, mark the robot online in the cache, allocate the
//!    frame buffer.
//! 3. Steady state: decode each text message and append it to the buffer;
//!    the buffer flushes in-path when full. Malformed payloads are dropped
//!    with a warning and the stream continues.
//! 4. Close: best-effort residual flush, per-session metrics log, session
//!    end-time + frame count persisted, buffer removed, cache session
//!    invalidated, registry disconnected.

use std::collections::HashMap;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use serde_json::json;
use tracing::{error, info, warn};

use crate::db::repo;
use crate::models::{FrameRecord, Robot, RobotState, now_epoch_secs};
use crate::state::AppState;

/// Close codes delivered after upgrade when auth is enabled.
const CLOSE_KEY_REQUIRED: u16 = 4001;
const CLOSE_KEY_INVALID: u16 = 4003;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyCheck {
    Accepted,
    Missing,
    Invalid,
}

/// Accept the key from the `X-API-Key` header or the `api_key` query
/// parameter. No configured key means the stream is open.
pub(crate) fn check_api_key(required: Option<&str>, header: Option<&str>, query: Option<&str>) -> KeyCheck {
    let Some(required) = required else {
        return KeyCheck::Accepted;
    };
    match header.or(query) {
        Some(provided) if provided == required => KeyCheck::Accepted,
        Some(_) => KeyCheck::Invalid,
        None => KeyCheck::Missing,
    }
}

/// Decode one inbound text message into a frame record. The payload is
/// stored verbatim; only `frame_index` and `timestamp` are interpreted.
pub(crate) fn decode_frame(session_id: i64, robot_id: &str, text: &str) -> Result<FrameRecord, String> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(|e| format!("invalid json: {e}"))?;
    let frame_index = value
        .get("frame_index")
        .and_then(serde_json::Value::as_i64)
        .ok_or("frame_index missing or not an integer")?;
    let timestamp = value
        .get("timestamp")
        .and_then(serde_json::Value::as_f64)
        .ok_or("timestamp missing or not a number")?;

    Ok(FrameRecord { session_id, robot_id: robot_id.to_owned(), frame_index, timestamp, data: value })
}

pub async fn handle_ws(
    State(state): State<AppState>,
    Path(robot_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let auth = check_api_key(
        state.config.api_key.as_deref(),
        headers.get("x-api-key").and_then(|value| value.to_str().ok()),
        params.get("api_key").map(String::as_str),
    );

    ws.on_upgrade(move |socket| run_stream(socket, state, robot_id, auth))
}

async fn run_stream(mut socket: WebSocket, state: AppState, robot_id: String, auth: KeyCheck) {
    match auth {
        KeyCheck::Accepted => {}
        KeyCheck::Missing => {
            close_with(&mut socket, CLOSE_KEY_REQUIRED, "API Key required").await;
            return;
        }
        KeyCheck::Invalid => {
            close_with(&mut socket, CLOSE_KEY_INVALID, "Invalid API Key").await;
            return;
        }
    }

    let now = now_epoch_secs();
    let robot = Robot {
        robot_id: robot_id.clone(),
        name: robot_id.clone(),
        robot_type: "unknown".into(),
        status: RobotState::Online,
        last_heartbeat: now,
    };
    if let Err(e) = repo::upsert_robot(&state.pool, &robot).await {
        error!(%robot_id, error = %e, "robot upsert failed; closing stream");
        return;
    }

    // fps is not negotiated; sessions record the configured default.
    let session_id = match repo::create_session(&state.pool, &robot_id, state.config.session_fps, now, None).await {
        Ok(id) => id,
        Err(e) => {
            error!(%robot_id, error = %e, "session create failed; closing stream");
            return;
        }
    };

    let (handle, mut outbound) = state.registry.connect().await;
    let buffer = state.telemetry.get_or_create(session_id, &robot_id).await;
    state
        .cache
        .update(&robot_id, json!({"state": "connected"}), Some(session_id), None)
        .await;

    info!(%robot_id, session_id, "stream opened");

    loop {
        tokio::select! {
            inbound = socket.recv() => {
                let Some(Ok(message)) = inbound else { break };
                match message {
                    Message::Text(text) => {
                        let frame = match decode_frame(session_id, &robot_id, text.as_str()) {
                            Ok(frame) => frame,
                            Err(reason) => {
                                warn!(%robot_id, session_id, reason, "frame dropped");
                                continue;
                            }
                        };
                        let last_index = frame.frame_index;
                        let last_timestamp = frame.timestamp;
                        let flushed = buffer.add(frame, &state.pool).await;
                        if flushed {
                            // Presence refresh rides on the flush cadence
                            // (~1/s at 60 Hz), not on every frame.
                            state
                                .cache
                                .update(
                                    &robot_id,
                                    json!({
                                        "state": "teleoperating",
                                        "frame_index": last_index,
                                        "timestamp": last_timestamp,
                                    }),
                                    Some(session_id),
                                    None,
                                )
                                .await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            text = outbound.recv() => {
                let Some(text) = text else { break };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    // Graceful-close path: residual flush is best effort; a dead store
    // loses the final partial batch, which is within contract.
    let residual = buffer.flush_all(&state.pool).await;
    let metrics = buffer.metrics().await;
    info!(
        %robot_id,
        session_id,
        residual,
        total_frames = metrics.total_frames,
        flush_count = metrics.flush_count,
        p50_ms = metrics.p50_processing_time_ms,
        p95_ms = metrics.p95_processing_time_ms,
        "stream closed"
    );

    state.telemetry.remove(session_id, &robot_id).await;
    #[allow(clippy::cast_possible_wrap)]
    if let Err(e) = repo::end_session(&state.pool, session_id, now_epoch_secs(), metrics.total_frames as i64).await {
        warn!(session_id, error = %e, "session close update failed");
    }
    state.cache.invalidate_session(session_id).await;
    state.registry.disconnect(handle).await;
}

async fn close_with(socket: &mut WebSocket, code: u16, reason: &str) {
    let frame = CloseFrame { code, reason: reason.into() };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
