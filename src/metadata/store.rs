//! Abstract metadata store trait.
//!
//! Any metadata backend must implement [`MetadataStore`].  The trait
//! uses manually desugared async methods (pinned boxed futures) so it can
//! be used as `Arc<dyn MetadataStore>` by the handlers.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Record types ───────────────────────────────────────────────────

/// Lifecycle state of a file record. `Active -> Deleted` happens at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Active,
    Deleted,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Active => "active",
            FileStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown file status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for FileStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(FileStatus::Active),
            "deleted" => Ok(FileStatus::Deleted),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Metadata record for one uploaded file, keyed by `(user_id, file_id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Owning identity (partition key).
    pub user_id: String,
    /// Time-ordered UUID, unique within `user_id`.
    pub file_id: String,
    pub file_name: String,
    pub content_type: String,
    /// Size in bytes.
    pub file_size: u64,
    /// Object store path: `{user_id}/{file_id}/{file_name}`.
    pub storage_key: String,
    /// Epoch milliseconds.
    pub upload_date: i64,
    pub status: FileStatus,
    /// Set on first share, never reset.
    pub shared: bool,
    pub last_shared_at: Option<i64>,
    pub deleted_at: Option<i64>,
}

impl FileRecord {
    /// Derive the object store key for a new file.
    pub fn storage_key_for(user_id: &str, file_id: &str, file_name: &str) -> String {
        format!("{user_id}/{file_id}/{file_name}")
    }

    pub fn is_active(&self) -> bool {
        self.status == FileStatus::Active
    }
}

// ── Pagination ─────────────────────────────────────────────────────

/// The store's pagination key: the last record of the previous page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub user_id: String,
    pub file_id: String,
}

#[derive(Debug, Error)]
#[error("malformed pagination cursor")]
pub struct MalformedCursor;

impl Cursor {
    pub fn after(record: &FileRecord) -> Self {
        Self {
            user_id: record.user_id.clone(),
            file_id: record.file_id.clone(),
        }
    }

    /// Opaque token: URL-safe base64 of the JSON key.
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> Result<Self, MalformedCursor> {
        let json = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| MalformedCursor)?;
        serde_json::from_slice(&json).map_err(|_| MalformedCursor)
    }
}

/// One page of active records, most recent first.
#[derive(Debug, Clone, Default)]
pub struct FilePage {
    pub records: Vec<FileRecord>,
    /// Present when the query stopped before exhausting the partition.
    pub next_cursor: Option<Cursor>,
}

// ── Trait ───────────────────────────────────────────────────────────

/// Async metadata store contract.
pub trait MetadataStore: Send + Sync + 'static {
    /// Insert or overwrite a record. No concurrency check.
    fn put(&self, record: FileRecord)
        -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Get a single record.
    fn get(
        &self,
        user_id: &str,
        file_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<FileRecord>>> + Send + '_>>;

    /// Active records of `user_id`, most recent first, resuming after `cursor`.
    fn query_active(
        &self,
        user_id: &str,
        limit: u32,
        cursor: Option<&Cursor>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<FilePage>> + Send + '_>>;

    /// Mark a record deleted. Does not look at the prior status.
    fn update_status_deleted(
        &self,
        user_id: &str,
        file_id: &str,
        deleted_at: i64,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Set `shared` and stamp `last_shared_at`.
    fn update_shared(
        &self,
        user_id: &str,
        file_id: &str,
        shared_at: i64,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;
}
