//! In-memory object store.
//!
//! Objects are held in a `tokio::sync::RwLock<HashMap<...>>`.  A
//! configurable memory limit (`max_size_bytes`) caps total stored bytes.
//! Downloads go through signed `/blobs/...` URLs served by this process.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::RwLock;

use super::backend::{ObjectNotFound, ObjectStore, StoredObject};
use crate::presign::UrlSigner;

pub struct MemoryObjectStore {
    /// storage_key -> object.
    objects: RwLock<HashMap<String, StoredObject>>,
    /// Current total bytes stored.
    current_size: RwLock<u64>,
    /// Maximum bytes allowed.  0 means unlimited.
    max_size_bytes: u64,
    signer: Arc<UrlSigner>,
}

impl MemoryObjectStore {
    pub fn new(max_size_bytes: u64, signer: Arc<UrlSigner>) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            current_size: RwLock::new(0),
            max_size_bytes,
            signer,
        }
    }

    /// Check whether storing `additional` bytes (after releasing
    /// `released`) would exceed the memory limit.
    async fn check_capacity(&self, additional: u64, released: u64) -> anyhow::Result<()> {
        if self.max_size_bytes == 0 {
            return Ok(());
        }
        let current = self.current_size.read().await.saturating_sub(released);
        if current + additional > self.max_size_bytes {
            anyhow::bail!(
                "Memory limit exceeded: current={current}, additional={additional}, max={}",
                self.max_size_bytes
            );
        }
        Ok(())
    }

    /// Adjust the tracked size by a signed delta.
    async fn adjust_size(&self, delta: i64) {
        let mut size = self.current_size.write().await;
        if delta >= 0 {
            *size = size.saturating_add(delta as u64);
        } else {
            *size = size.saturating_sub(delta.unsigned_abs());
        }
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put(
        &self,
        storage_key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let storage_key = storage_key.to_string();
        let content_type = content_type.to_string();
        Box::pin(async move {
            let new_len = data.len() as u64;
            let mut objects = self.objects.write().await;
            let old_len = objects
                .get(&storage_key)
                .map(|o| o.data.len() as u64)
                .unwrap_or(0);
            self.check_capacity(new_len, old_len).await?;

            objects.insert(storage_key, StoredObject { data, content_type });
            self.adjust_size(new_len as i64 - old_len as i64).await;
            Ok(())
        })
    }

    fn get(
        &self,
        storage_key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<StoredObject>> + Send + '_>> {
        let storage_key = storage_key.to_string();
        Box::pin(async move {
            let objects = self.objects.read().await;
            objects
                .get(&storage_key)
                .cloned()
                .ok_or_else(|| anyhow::Error::new(ObjectNotFound(storage_key)))
        })
    }

    fn delete(
        &self,
        storage_key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let storage_key = storage_key.to_string();
        Box::pin(async move {
            let removed = self.objects.write().await.remove(&storage_key);
            if let Some(object) = removed {
                self.adjust_size(-(object.data.len() as i64)).await;
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
