//! File lifecycle handlers: upload, list, download, delete and share.
//!
//! Each handler composes the metadata store and the object store for one
//! principal. Two-step sequences (bytes then record, object then status)
//! are not atomic and a failure between the steps is not compensated.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::Response;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use bytes::Bytes;
use chrono::Utc;
use garde::Validate;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use super::json_response;
use crate::auth::Principal;
use crate::errors::{ApiError, DependencyExt};
use crate::metadata::store::{Cursor, FileRecord, FileStatus};
use crate::storage::backend::DEFAULT_CONTENT_TYPE;
use crate::AppState;

pub const DEFAULT_LIST_LIMIT: u32 = 50;
pub const MAX_LIST_LIMIT: u32 = 1000;

/// Lifetime of a download URL, in seconds.
pub const DOWNLOAD_URL_TTL_SECS: u64 = 3600;

pub const DEFAULT_SHARE_TTL_SECS: u64 = 86_400;

/// Longest share link accepted, in seconds (the S3 presign ceiling).
pub const MAX_SHARE_TTL_SECS: u64 = 604_800;

const MISSING_UPLOAD_FIELDS: &str = "Missing required fields: fileName, fileContent";
const INVALID_FILE_CONTENT: &str = "Invalid fileContent encoding";
const INVALID_FILE_NAME: &str = "Invalid fileName";
const MISSING_FILE_ID: &str = "Missing fileId parameter";
const INVALID_LAST_KEY: &str = "Invalid lastKey parameter";

/// Standard alphabet, padding optional.
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

// -- Request bodies -----------------------------------------------------------

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    #[garde(required, length(min = 1))]
    pub file_name: Option<String>,
    /// Base64-encoded file bytes.
    #[garde(required, length(min = 1))]
    pub file_content: Option<String>,
    #[garde(skip)]
    pub content_type: Option<String>,
    /// Declared size; the decoded length is used when absent or zero.
    #[garde(skip)]
    pub file_size: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShareRequest {
    /// Link lifetime in seconds; absent or 0 means one day.
    #[garde(range(max = 604_800))]
    pub expires_in: Option<u64>,
}

// -- Response bodies ----------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: &'static str,
    pub file_id: String,
    pub file_name: String,
    /// Epoch milliseconds.
    pub upload_date: i64,
}

/// Projection of a record returned by `GET /files`.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub content_type: String,
    pub upload_date: i64,
    pub shared: bool,
}

impl From<FileRecord> for FileSummary {
    fn from(record: FileRecord) -> Self {
        Self {
            file_id: record.file_id,
            file_name: record.file_name,
            file_size: record.file_size,
            content_type: record.content_type,
            upload_date: record.upload_date,
            shared: record.shared,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub files: Vec<FileSummary>,
    pub count: usize,
    /// Cursor for the next page, `null` on the last page.
    pub last_key: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResponse {
    pub download_url: String,
    pub file_name: String,
    pub file_size: u64,
    pub content_type: String,
    pub expires_in: u64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub message: &'static str,
    pub file_id: String,
    pub file_name: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShareResponse {
    pub message: &'static str,
    pub share_url: String,
    pub file_name: String,
    pub expires_in: u64,
    /// Epoch milliseconds.
    pub expires_at: i64,
}

// -- Helpers ------------------------------------------------------------------

/// Parse the `limit` query value. Absent, non-numeric or zero means the
/// default; larger values are clamped.
pub fn parse_limit(raw: Option<&str>) -> u32 {
    raw.and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|limit| *limit > 0)
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .min(MAX_LIST_LIMIT)
}

/// `fileName` becomes the last part of the storage key, so `.` and `..`
/// segments are refused before they reach a filesystem backend.
fn check_file_name(file_name: &str) -> Result<(), ApiError> {
    if file_name.split('/').any(|segment| segment == "." || segment == "..") {
        return Err(ApiError::Validation(INVALID_FILE_NAME.to_string()));
    }
    Ok(())
}

fn require_file_id(file_id: &str) -> Result<&str, ApiError> {
    let file_id = file_id.trim();
    if file_id.is_empty() {
        return Err(ApiError::Validation(MISSING_FILE_ID.to_string()));
    }
    Ok(file_id)
}

/// Look up a record that must still be active.
async fn active_record(
    state: &AppState,
    principal: &Principal,
    file_id: &str,
    failure: &str,
) -> Result<FileRecord, ApiError> {
    state
        .metadata
        .get(&principal.user_id, file_id)
        .await
        .dependency(failure)?
        .filter(FileRecord::is_active)
        .ok_or_else(ApiError::file_not_found)
}

// -- Handlers -----------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/upload",
    tag = "Files",
    operation_id = "UploadFile",
    request_body = UploadRequest,
    responses(
        (status = 200, description = "File stored", body = UploadResponse),
        (status = 400, description = "Missing fields or bad encoding"),
        (status = 500, description = "Store failure")
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %principal.user_id))]
pub async fn upload(
    state: Arc<AppState>,
    principal: &Principal,
    request: UploadRequest,
) -> Result<Response, ApiError> {
    const FAILURE: &str = "Failed to upload file";

    let missing = || ApiError::Validation(MISSING_UPLOAD_FIELDS.to_string());
    request.validate().map_err(|_| missing())?;
    let (Some(file_name), Some(file_content)) = (request.file_name, request.file_content) else {
        return Err(missing());
    };
    check_file_name(&file_name)?;

    let data = BASE64
        .decode(file_content.trim())
        .map_err(|_| ApiError::Validation(INVALID_FILE_CONTENT.to_string()))?;
    let data = Bytes::from(data);

    let content_type = request
        .content_type
        .filter(|ct| !ct.is_empty())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
    let file_size = request
        .file_size
        .filter(|size| *size > 0)
        .unwrap_or(data.len() as u64);

    let file_id = uuid::Uuid::now_v7().to_string();
    let storage_key = FileRecord::storage_key_for(&principal.user_id, &file_id, &file_name);
    let upload_date = Utc::now().timestamp_millis();
    let uploaded = data.len() as u64;

    state
        .storage
        .put(&storage_key, data, &content_type)
        .await
        .dependency(FAILURE)?;

    let record = FileRecord {
        user_id: principal.user_id.clone(),
        file_id: file_id.clone(),
        file_name: file_name.clone(),
        content_type,
        file_size,
        storage_key,
        upload_date,
        status: FileStatus::Active,
        shared: false,
        last_shared_at: None,
        deleted_at: None,
    };
    state.metadata.put(record).await.dependency(FAILURE)?;

    crate::metrics::record_bytes_uploaded(uploaded);
    info!(file_id = %file_id, size = file_size, "File uploaded");

    let body = UploadResponse {
        message: "File uploaded successfully",
        file_id,
        file_name,
        upload_date,
    };
    Ok(json_response(StatusCode::OK, &body))
}

#[utoipa::path(
    get,
    path = "/files",
    tag = "Files",
    operation_id = "ListFiles",
    params(
        ("limit" = Option<u32>, Query, description = "Page size, default 50, at most 1000"),
        ("lastKey" = Option<String>, Query, description = "Cursor from the previous page")
    ),
    responses(
        (status = 200, description = "Active files, newest first", body = ListResponse),
        (status = 400, description = "Malformed cursor"),
        (status = 500, description = "Store failure")
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %principal.user_id))]
pub async fn list(
    state: Arc<AppState>,
    principal: &Principal,
    limit: Option<&str>,
    last_key: Option<&str>,
) -> Result<Response, ApiError> {
    let limit = parse_limit(limit);

    let cursor = match last_key.filter(|k| !k.is_empty()) {
        Some(token) => {
            let cursor = Cursor::decode(token)
                .map_err(|_| ApiError::Validation(INVALID_LAST_KEY.to_string()))?;
            if cursor.user_id != principal.user_id {
                return Err(ApiError::Validation(INVALID_LAST_KEY.to_string()));
            }
            Some(cursor)
        }
        None => None,
    };

    let page = state
        .metadata
        .query_active(&principal.user_id, limit, cursor.as_ref())
        .await
        .dependency("Failed to list files")?;

    let files: Vec<FileSummary> = page.records.into_iter().map(FileSummary::from).collect();
    let body = ListResponse {
        count: files.len(),
        files,
        last_key: page.next_cursor.map(|c| c.encode()),
    };
    Ok(json_response(StatusCode::OK, &body))
}

#[utoipa::path(
    get,
    path = "/download/{fileId}",
    tag = "Files",
    operation_id = "DownloadFile",
    params(("fileId" = String, Path, description = "File identifier")),
    responses(
        (status = 200, description = "Time-limited download URL", body = DownloadResponse),
        (status = 400, description = "Missing fileId"),
        (status = 404, description = "File not found"),
        (status = 500, description = "Store failure")
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %principal.user_id))]
pub async fn download(
    state: Arc<AppState>,
    principal: &Principal,
    file_id: &str,
) -> Result<Response, ApiError> {
    const FAILURE: &str = "Failed to generate download URL";

    let file_id = require_file_id(file_id)?;

    // Downloads resolve any record, including soft-deleted ones.
    let record = state
        .metadata
        .get(&principal.user_id, file_id)
        .await
        .dependency(FAILURE)?
        .ok_or_else(ApiError::file_not_found)?;

    let download_url = state
        .storage
        .presigned_get_url(
            &record.storage_key,
            Duration::from_secs(DOWNLOAD_URL_TTL_SECS),
        )
        .await
        .dependency(FAILURE)?;

    let body = DownloadResponse {
        download_url,
        file_name: record.file_name,
        file_size: record.file_size,
        content_type: record.content_type,
        expires_in: DOWNLOAD_URL_TTL_SECS,
    };
    Ok(json_response(StatusCode::OK, &body))
}

#[utoipa::path(
    delete,
    path = "/files/{fileId}",
    tag = "Files",
    operation_id = "DeleteFile",
    params(("fileId" = String, Path, description = "File identifier")),
    responses(
        (status = 200, description = "File deleted", body = DeleteResponse),
        (status = 400, description = "Missing fileId"),
        (status = 404, description = "File not found or already deleted"),
        (status = 500, description = "Store failure")
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %principal.user_id))]
pub async fn delete(
    state: Arc<AppState>,
    principal: &Principal,
    file_id: &str,
) -> Result<Response, ApiError> {
    const FAILURE: &str = "Failed to delete file";

    let file_id = require_file_id(file_id)?;
    let record = active_record(&state, principal, file_id, FAILURE).await?;

    state
        .storage
        .delete(&record.storage_key)
        .await
        .dependency(FAILURE)?;
    state
        .metadata
        .update_status_deleted(
            &principal.user_id,
            file_id,
            Utc::now().timestamp_millis(),
        )
        .await
        .dependency(FAILURE)?;

    info!(file_id = %file_id, "File deleted");

    let body = DeleteResponse {
        message: "File deleted successfully",
        file_id: record.file_id,
        file_name: record.file_name,
    };
    Ok(json_response(StatusCode::OK, &body))
}

#[utoipa::path(
    post,
    path = "/share/{fileId}",
    tag = "Files",
    operation_id = "ShareFile",
    params(("fileId" = String, Path, description = "File identifier")),
    request_body = ShareRequest,
    responses(
        (status = 200, description = "Share link issued", body = ShareResponse),
        (status = 400, description = "Missing fileId or expiresIn too large"),
        (status = 404, description = "File not found"),
        (status = 500, description = "Store failure")
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %principal.user_id))]
pub async fn share(
    state: Arc<AppState>,
    principal: &Principal,
    file_id: &str,
    request: ShareRequest,
) -> Result<Response, ApiError> {
    const FAILURE: &str = "Failed to generate share link";

    let file_id = require_file_id(file_id)?;
    request.validate().map_err(|_| {
        ApiError::Validation(format!(
            "expiresIn must not exceed {MAX_SHARE_TTL_SECS} seconds"
        ))
    })?;
    let expires_in = request
        .expires_in
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_SHARE_TTL_SECS);

    let record = active_record(&state, principal, file_id, FAILURE).await?;

    let share_url = state
        .storage
        .presigned_get_url(&record.storage_key, Duration::from_secs(expires_in))
        .await
        .dependency(FAILURE)?;

    let now = Utc::now().timestamp_millis();
    state
        .metadata
        .update_shared(&principal.user_id, file_id, now)
        .await
        .dependency(FAILURE)?;

    info!(file_id = %file_id, expires_in, "Share link generated");

    let body = ShareResponse {
        message: "Share link generated successfully",
        share_url,
        file_name: record.file_name,
        expires_in,
        expires_at: now + (expires_in as i64) * 1000,
    };
    Ok(json_response(StatusCode::OK, &body))
}
