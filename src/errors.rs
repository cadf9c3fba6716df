//! API error types.
//!
//! Every variant maps to one HTTP status and renders through the shared
//! JSON envelope (`{error, details?}`), so handlers can simply return
//! `Err(ApiError::NotFound(..))`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::handlers::json_response;

/// Message used for every missing or foreign file record.
pub const FILE_NOT_FOUND: &str = "File not found";

/// Errors surfaced to HTTP clients.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A required field is missing or malformed.
    #[error("{0}")]
    Validation(String),

    /// No matching record for the requesting identity.
    #[error("{0}")]
    NotFound(String),

    /// Credential missing or rejected. Carries no reason.
    #[error("Unauthorized")]
    Unauthorized,

    /// Request body over `server.max_body_bytes`.
    #[error("Request body too large")]
    PayloadTooLarge,

    /// A presigned link that is expired or carries a bad signature.
    #[error("{0}")]
    Forbidden(String),

    /// A store call failed; `source` is echoed to the client as `details`.
    #[error("{message}")]
    Dependency {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ApiError {
    pub fn file_not_found() -> Self {
        ApiError::NotFound(FILE_NOT_FOUND.to_string())
    }

    /// Return the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Dependency { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Option<String> {
        match self {
            ApiError::Dependency { source, .. } => Some(source.to_string()),
            _ => None,
        }
    }
}

/// Wire shape of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
            details: self.details(),
        };
        json_response(self.status_code(), &body)
    }
}

/// Attach a client-facing operation message to a store failure and log it.
pub trait DependencyExt<T> {
    fn dependency(self, message: &str) -> Result<T, ApiError>;
}

impl<T> DependencyExt<T> for anyhow::Result<T> {
    fn dependency(self, message: &str) -> Result<T, ApiError> {
        self.map_err(|source| {
            tracing::error!(error = %source, "{message}");
            ApiError::Dependency {
                message: message.to_string(),
                source,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::file_not_found().status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::Forbidden("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::PayloadTooLarge.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        let err: Result<(), ApiError> =
            Err(anyhow::anyhow!("table unavailable")).dependency("Failed to list files");
        assert_eq!(
            err.unwrap_err().status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_dependency_error_body_carries_details() {
        let err = Err::<(), _>(anyhow::anyhow!("bucket gone"))
            .dependency("Failed to upload file")
            .unwrap_err();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Failed to upload file");
        assert_eq!(json["details"], "bucket gone");
    }

    #[tokio::test]
    async fn test_not_found_body_has_no_details() {
        let response = ApiError::file_not_found().into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({"error": "File not found"}));
    }
}
