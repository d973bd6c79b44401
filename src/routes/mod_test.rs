use super::*;

use axum::body::Body;
use axum::http::{Request as HttpRequest, StatusCode};
use tower::ServiceExt;

use crate::db::repo;
use crate::state::test_helpers::{test_app_state, test_app_state_with_key};

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> HttpRequest<Body> {
    HttpRequest::builder().uri(uri).body(Body::empty()).unwrap()
}

// =============================================================================
// health & request id
// =============================================================================

#[tokio::test]
async fn health_is_open_and_reports_healthy() {
    let (state, _dir) = test_app_state().await;
    let response = app(state).oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn ready_reports_ok_with_live_store() {
    let (state, _dir) = test_app_state().await;
    let response = app(state).oneshot(get("/health/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn responses_carry_generated_request_id() {
    let (state, _dir) = test_app_state().await;
    let response = app(state).oneshot(get("/health")).await.unwrap();
    let request_id = response.headers().get("x-request-id").unwrap().to_str().unwrap();
    assert_eq!(request_id.len(), 32);
}

#[tokio::test]
async fn inbound_request_id_is_reused() {
    let (state, _dir) = test_app_state().await;
    let request = HttpRequest::builder()
        .uri("/sessions/12345")
        .header("x-request-id", "caller-id-1")
        .body(Body::empty())
        .unwrap();
    let response = app(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers().get("x-request-id").unwrap(), "caller-id-1");
    let body = body_json(response).await;
    assert_eq!(body["error"]["request_id"], "caller-id-1");
    assert_eq!(body["error"]["code"], "E_NOT_FOUND");
}

// =============================================================================
// auth middleware
// =============================================================================

#[tokio::test]
async fn api_key_required_when_configured() {
    let (state, _dir) = test_app_state_with_key("secret").await;
    let response = app(state).oneshot(get("/robots")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "E_UNAUTHORIZED");
}

#[tokio::test]
async fn valid_api_key_passes() {
    let (state, _dir) = test_app_state_with_key("secret").await;
    let request = HttpRequest::builder()
        .uri("/robots")
        .header("x-api-key", "secret")
        .body(Body::empty())
        .unwrap();
    let response = app(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_bypasses_api_key() {
    let (state, _dir) = test_app_state_with_key("secret").await;
    let response = app(state).oneshot(get("/health/detail")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// =============================================================================
// robots & sessions
// =============================================================================

#[tokio::test]
async fn robots_empty_store() {
    let (state, _dir) = test_app_state().await;
    let response = app(state).oneshot(get("/robots")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["count"], 0);
    assert_eq!(body["active_connections"], 0);
}

#[tokio::test]
async fn unknown_robot_status_is_404() {
    let (state, _dir) = test_app_state().await;
    let response = app(state).oneshot(get("/robots/ghost/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn robot_status_reports_sessions_and_cache() {
    let (state, _dir) = test_app_state().await;
    repo::create_session(&state.pool, "robot-001", 60, 100.0, None).await.unwrap();
    state
        .cache
        .update("robot-001", serde_json::json!({"state": "connected"}), Some(1), None)
        .await;

    let response = app(state).oneshot(get("/robots/robot-001/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["online"], true);
    assert_eq!(body["total_sessions"], 1);
    assert_eq!(body["recent_sessions"][0]["fps"], 60);
}

#[tokio::test]
async fn session_listing_filters_by_robot() {
    let (state, _dir) = test_app_state().await;
    repo::create_session(&state.pool, "robot-a", 60, 10.0, None).await.unwrap();
    repo::create_session(&state.pool, "robot-b", 60, 20.0, None).await.unwrap();

    let response = app(state.clone()).oneshot(get("/sessions?robot_id=robot-a")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["sessions"][0]["robot_id"], "robot-a");

    let response = app(state).oneshot(get("/sessions?limit=1")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["limit"], 1);
}

#[tokio::test]
async fn session_detail_includes_frames_and_videos() {
    let (state, _dir) = test_app_state().await;
    let session_id = repo::create_session(&state.pool, "robot-001", 60, 10.0, None).await.unwrap();
    repo::insert_frames(
        &state.pool,
        &[crate::models::FrameRecord {
            session_id,
            robot_id: "robot-001".into(),
            frame_index: 0,
            timestamp: 10.0,
            data: serde_json::json!({"frame_index": 0}),
        }],
    )
    .await
    .unwrap();

    let response = app(state).oneshot(get(&format!("/sessions/{session_id}"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["frame_count"], 1);
    assert_eq!(body["robot_id"], "robot-001");
    assert!(body["videos"].as_array().unwrap().is_empty());
}

// =============================================================================
// storage status
// =============================================================================

#[tokio::test]
async fn storage_status_reports_unconfigured_backend() {
    let (state, _dir) = test_app_state().await;
    let response = app(state).oneshot(get("/upload/storage-status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["s3_configured"], false);
    assert!(body["active_backend"].is_null());
}
