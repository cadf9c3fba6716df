//! Unauthenticated service endpoints.

use axum::http::StatusCode;
use axum::response::Response;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::json_response;

pub const SERVICE_NAME: &str = "cloudkeep-backend";

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    /// RFC 3339 UTC time of the check.
    pub timestamp: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IndexResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub endpoints: Vec<&'static str>,
}

const ENDPOINTS: &[&str] = &[
    "GET /health",
    "POST /upload",
    "GET /files",
    "GET /download/{fileId}",
    "DELETE /files/{fileId}",
    "POST /share/{fileId}",
];

#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    operation_id = "HealthCheck",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health() -> Response {
    let body = HealthResponse {
        status: "healthy",
        service: SERVICE_NAME,
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    };
    json_response(StatusCode::OK, &body)
}

#[utoipa::path(
    get,
    path = "/",
    tag = "Health",
    operation_id = "ServiceIndex",
    responses(
        (status = 200, description = "Service name, version and routes", body = IndexResponse)
    )
)]
pub async fn index() -> Response {
    let body = IndexResponse {
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        endpoints: ENDPOINTS.to_vec(),
    };
    json_response(StatusCode::OK, &body)
}
