//! Local filesystem object store.
//!
//! Objects are stored as flat files under a configurable root directory.
//! The storage key is used directly as a relative path
//! (e.g., "user/file-id/name.txt"); the content type lives in a sidecar
//! file under `.meta/` with the same relative path.
//!
//! All writes follow crash-only design: write to temp file, fsync, rename.

use std::future::Future;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use super::backend::{ObjectNotFound, ObjectStore, StoredObject, DEFAULT_CONTENT_TYPE};
use crate::presign::UrlSigner;

const TMP_DIR: &str = ".tmp";
const META_DIR: &str = ".meta";

/// Stores objects on the local filesystem.
pub struct LocalObjectStore {
    /// Root directory for all stored objects.
    root: PathBuf,
    signer: Arc<UrlSigner>,
}

impl LocalObjectStore {
    /// Create a new `LocalObjectStore` rooted at `root`.
    ///
    /// The directory will be created if it does not exist.
    pub fn new(root: impl Into<PathBuf>, signer: Arc<UrlSigner>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join(TMP_DIR))?;
        std::fs::create_dir_all(root.join(META_DIR))?;
        Ok(Self { root, signer })
    }

    /// Reject keys that could escape the root or land in a reserved directory.
    fn check_key(storage_key: &str) -> anyhow::Result<()> {
        let mut components = Path::new(storage_key).components().peekable();
        if components.peek().is_none() {
            anyhow::bail!("Empty storage key");
        }
        for (i, component) in components.enumerate() {
            match component {
                Component::Normal(name) => {
                    if i == 0 && (name == TMP_DIR || name == META_DIR) {
                        anyhow::bail!("Reserved directory in storage key: {storage_key}");
                    }
                }
                _ => anyhow::bail!("Path traversal detected in storage key: {storage_key}"),
            }
        }
        Ok(())
    }

    fn object_path(&self, storage_key: &str) -> anyhow::Result<PathBuf> {
        Self::check_key(storage_key)?;
        Ok(self.root.join(storage_key))
    }

    fn meta_path(&self, storage_key: &str) -> anyhow::Result<PathBuf> {
        Self::check_key(storage_key)?;
        Ok(self.root.join(META_DIR).join(storage_key))
    }

    /// Generate a temp file path under .tmp/ for atomic writes.
    fn temp_path(&self) -> PathBuf {
        let id = uuid::Uuid::new_v4();
        self.root.join(TMP_DIR).join(format!("tmp-{id}"))
    }

    /// Crash-only write: temp file, fsync, rename into place.
    fn write_atomic(&self, final_path: &Path, data: &[u8]) -> anyhow::Result<()> {
        if let Some(parent) = final_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.temp_path();
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, final_path)?;
        Ok(())
    }

    /// Remove now-empty parent directories up to (not including) `stop`.
    fn prune_empty_dirs(path: &Path, stop: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == stop || std::fs::remove_dir(dir).is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

impl ObjectStore for LocalObjectStore {
    fn put(
        &self,
        storage_key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let storage_key = storage_key.to_string();
        let content_type = content_type.to_string();
        Box::pin(async move {
            let object_path = self.object_path(&storage_key)?;
            let meta_path = self.meta_path(&storage_key)?;

            self.write_atomic(&meta_path, content_type.as_bytes())?;
            self.write_atomic(&object_path, &data)?;
            Ok(())
        })
    }

    fn get(
        &self,
        storage_key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<StoredObject>> + Send + '_>> {
        let storage_key = storage_key.to_string();
        Box::pin(async move {
            let path = self.object_path(&storage_key)?;
            if !path.is_file() {
                return Err(ObjectNotFound(storage_key).into());
            }

            let data = Bytes::from(std::fs::read(&path)?);
            let content_type = std::fs::read_to_string(self.meta_path(&storage_key)?)
                .unwrap_or_else(|_| DEFAULT_CONTENT_TYPE.to_string());

            Ok(StoredObject { data, content_type })
        })
    }

    fn delete(
        &self,
        storage_key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let storage_key = storage_key.to_string();
        Box::pin(async move {
            let path = self.object_path(&storage_key)?;
            let meta_path = self.meta_path(&storage_key)?;

            for (file, stop) in [(&path, self.root.clone()), (&meta_path, self.root.join(META_DIR))] {
                match std::fs::remove_file(file) {
                    Ok(()) => Self::prune_empty_dirs(file, &stop),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(())
        })
    }

    fn presigned_get_url(
        &self,
        storage_key: &str,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>> {
        let url = self.signer.sign_url(storage_key, ttl);
        Box::pin(async move { Ok(url) })
    }
}
