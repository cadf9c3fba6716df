//! Request handlers.
//!
//! Handlers take already-extracted inputs (state, principal, parsed body)
//! and return `Result<Response, ApiError>`; routing and extraction live in
//! [`crate::server`].

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

pub mod blobs;
pub mod files;
pub mod health;

/// Serialize `body` as the JSON envelope with the given status.
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_vec(body) {
        Ok(bytes) => (
            status,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )],
            bytes,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to serialize response body: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
