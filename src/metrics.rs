//! Prometheus metrics for CloudKeep.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides an axum middleware for HTTP RED
//! metrics, and exposes the `/metrics` endpoint handler.

use std::sync::OnceLock;
use std::time::Instant;

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::errors::ApiError;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "cloudkeep_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "cloudkeep_http_request_duration_seconds";

/// File lifecycle operations (counter). Labels: operation, outcome.
pub const FILE_OPERATIONS_TOTAL: &str = "cloudkeep_file_operations_total";

/// Decoded bytes accepted by successful uploads (counter).
pub const BYTES_UPLOADED_TOTAL: &str = "cloudkeep_bytes_uploaded_total";

// -- Global recorder installation ---------------------------------------------

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times (e.g. in tests). Returns a reference to the global handle.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    })
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(
        FILE_OPERATIONS_TOTAL,
        "File operations by type and outcome"
    );
    describe_counter!(BYTES_UPLOADED_TOTAL, "Total decoded bytes uploaded");
}

/// Count one file operation and pass its result through unchanged.
///
/// Outcomes: `success`, `rejected` (4xx) and `error` (5xx).
pub fn observe_file_operation<T>(
    operation: &'static str,
    result: Result<T, ApiError>,
) -> Result<T, ApiError> {
    let outcome = match &result {
        Ok(_) => "success",
        Err(e) if e.status_code().is_client_error() => "rejected",
        Err(_) => "error",
    };
    counter!(FILE_OPERATIONS_TOTAL, "operation" => operation, "outcome" => outcome).increment(1);
    result
}

pub fn record_bytes_uploaded(bytes: u64) {
    counter!(BYTES_UPLOADED_TOTAL).increment(bytes);
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// Excludes `/metrics` from self-instrumentation to avoid feedback loops.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path, "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

// -- Path normalization -------------------------------------------------------

/// Normalize an actual request path to a route template for metric labels.
///
/// Examples:
/// - `/files` -> `/files`
/// - `/files/0199...` -> `/files/{fileId}`
/// - `/download/0199...` -> `/download/{fileId}`
/// - `/blobs/alice/0199.../a.txt` -> `/blobs/{key}`
/// - anything else -> `/{other}`
fn normalize_path(path: &str) -> &'static str {
    match path {
        "/" => "/",
        "/health" => "/health",
        "/upload" => "/upload",
        "/files" => "/files",
        "/openapi.json" => "/openapi.json",
        "/metrics" => "/metrics",
        _ if path.starts_with("/files/") => "/files/{fileId}",
        _ if path.starts_with("/download/") => "/download/{fileId}",
        _ if path.starts_with("/share/") => "/share/{fileId}",
        _ if path.starts_with("/blobs/") => "/blobs/{key}",
        _ => "/{other}",
    }
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler() -> impl IntoResponse {
    let body = init_metrics().render();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

// -- Tests --------------------------------------------------------------------
