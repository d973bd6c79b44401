//! Router assembly and request middleware.
//!
//! Two layers wrap the API: request-id propagation (inbound `x-request-id`
//! reused, otherwise generated) and API-key auth. Health probes bypass
//! auth; the WS route negotiates its own key so it can answer with close
//! codes instead of HTTP statuses.

pub mod health;
pub mod robots;
pub mod sessions;
pub mod upload;
pub mod ws;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{ApiError, REQUEST_ID_HEADER, RequestId, generate_request_id};
use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    // Declared multipart bodies may exceed the video cap slightly (boundary
    // and form-field overhead); handlers enforce the exact limits.
    let body_limit = usize::try_from(state.config.video_max_size_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(1024 * 1024);

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .route("/health/detail", get(health::detail))
        .route("/robots", get(robots::list_robots))
        .route("/robots/{robot_id}/status", get(robots::robot_status))
        .route("/sessions", get(sessions::list_sessions))
        .route("/sessions/{session_id}", get(sessions::session_detail))
        .route("/upload/sync", post(upload::upload_sync))
        .route("/upload/video", post(upload::upload_video))
        .route("/upload/storage-status", get(upload::storage_status))
        .route("/ws/log/{robot_id}", get(ws::handle_ws))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .layer(middleware::from_fn(propagate_request_id))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Attach a `RequestId` to the request extensions and echo it on the
/// response.
async fn propagate_request_id(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map_or_else(generate_request_id, str::to_owned);

    request.extensions_mut().insert(RequestId(request_id.clone()));
    let mut response = next.run(request).await;

    if !response.headers().contains_key(REQUEST_ID_HEADER) {
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
    }
    response
}

/// Reject requests without the configured `X-API-Key`. Health endpoints are
/// always open; the WS route handles its own key exchange.
async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.config.api_key.as_deref() else {
        return next.run(request).await;
    };

    let path = request.uri().path();
    if path.starts_with("/health") || path.starts_with("/ws/") {
        return next.run(request).await;
    }

    let provided = request.headers().get("x-api-key").and_then(|value| value.to_str().ok());
    if provided == Some(expected) {
        return next.run(request).await;
    }

    let request_id = request
        .extensions()
        .get::<RequestId>()
        .cloned()
        .unwrap_or_else(|| RequestId(generate_request_id()));
    ApiError::unauthorized("API key missing or invalid", &request_id).into_response()
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
