//! Abstract object store trait.
//!
//! Every storage backend must implement [`ObjectStore`].  Objects are
//! opaque byte blobs addressed by a storage key, stored together with
//! their content type.  Reads happen out-of-band through time-limited
//! URLs, so the trait exposes [`ObjectStore::presigned_get_url`] instead
//! of a streaming read path.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

/// Fallback content type for objects stored without one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A stored object's data plus the content type it was written with.
#[derive(Debug, Clone)]
pub struct StoredObject {
    /// Raw bytes of the object.
    pub data: Bytes,
    pub content_type: String,
}

/// Returned (inside `anyhow::Error`) when a key has no object.
#[derive(Debug, Error)]
#[error("Object not found at storage key: {0}")]
pub struct ObjectNotFound(pub String);

/// Async object storage contract.
pub trait ObjectStore: Send + Sync + 'static {
    /// Write `data` to `storage_key`, replacing any existing object.
    fn put(
        &self,
        storage_key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Read the full object at `storage_key`.
    fn get(
        &self,
        storage_key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<StoredObject>> + Send + '_>>;

    /// Delete the object at `storage_key`. Missing objects are not an error.
    fn delete(
        &self,
        storage_key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// A URL granting read access to `storage_key` for `ttl`.
    ///
    /// Does not check that the object exists.
    fn presigned_get_url(
        &self,
        storage_key: &str,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>>;
}

/// True when `err` reports a missing object.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ObjectNotFound>().is_some()
}
