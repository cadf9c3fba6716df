//! `GET /blobs/*key`: serves object bytes behind an HMAC-signed URL.
//!
//! The link itself is the credential, so no principal is involved.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::errors::{ApiError, DependencyExt};
use crate::presign::SignatureError;
use crate::storage::backend::{is_not_found, DEFAULT_CONTENT_TYPE};
use crate::AppState;

pub async fn serve_blob(
    state: Arc<AppState>,
    key: &str,
    query: &HashMap<String, String>,
) -> Result<Response, ApiError> {
    let invalid = || ApiError::Forbidden(SignatureError::Invalid.to_string());

    let expires = query
        .get("expires")
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or_else(invalid)?;
    let signature = query.get("signature").ok_or_else(invalid)?;

    state
        .signer
        .verify(key, expires, signature)
        .map_err(|e| {
            debug!(key, "Blob link rejected: {e}");
            ApiError::Forbidden(e.to_string())
        })?;

    let object = match state.storage.get(key).await {
        Err(e) if is_not_found(&e) => return Err(ApiError::file_not_found()),
        result => result.dependency("Failed to read file")?,
    };

    let content_type = HeaderValue::from_str(&object.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type)],
        object.data,
    )
        .into_response())
}
