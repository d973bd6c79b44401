//! API error shape and request-id propagation.
//!
//! DESIGN
//! ======
//! Every surfaced HTTP error serializes as
//! `{"error": {"code", "message", "request_id"}}`. The request id is taken
//! from the inbound `x-request-id` header when present, otherwise generated,
//! and echoed back on every response.

use std::fmt::Write;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rand::Rng;
use serde_json::json;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-request correlation id, injected into request extensions by the
/// middleware in `routes`.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Generate a random 16-byte hex request id.
#[must_use]
pub fn generate_request_id() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes_to_hex(&bytes)
}

/// HTTP-facing error. Handlers build these with the helpers below so the
/// status/code pairing stays consistent across routes.
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub request_id: String,
}

impl ApiError {
    #[must_use]
    pub fn bad_request(message: impl Into<String>, request_id: &RequestId) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "E_BAD_REQUEST", message, request_id)
    }

    #[must_use]
    pub fn unauthorized(message: impl Into<String>, request_id: &RequestId) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "E_UNAUTHORIZED", message, request_id)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>, request_id: &RequestId) -> Self {
        Self::new(StatusCode::NOT_FOUND, "E_NOT_FOUND", message, request_id)
    }

    #[must_use]
    pub fn payload_too_large(message: impl Into<String>, request_id: &RequestId) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, "E_PAYLOAD_TOO_LARGE", message, request_id)
    }

    #[must_use]
    pub fn unprocessable(message: impl Into<String>, request_id: &RequestId) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "E_UNPROCESSABLE", message, request_id)
    }

    #[must_use]
    pub fn internal(message: impl Into<String>, request_id: &RequestId) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "E_INTERNAL", message, request_id)
    }

    fn new(status: StatusCode, code: &'static str, message: impl Into<String>, request_id: &RequestId) -> Self {
        Self { status, code, message: message.into(), request_id: request_id.0.clone() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.code,
                "message": self.message,
                "request_id": self.request_id.clone(),
            }
        });
        (self.status, [(REQUEST_ID_HEADER, self.request_id)], Json(body)).into_response()
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
