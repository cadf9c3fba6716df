//! In-memory metadata store.
//!
//! Stores all records in memory with no persistence. Useful for testing
//! and local development. Uses `RwLock<BTreeMap>` keyed by
//! `(user_id, file_id)` so a partition scan is an ordered range.

use std::collections::BTreeMap;
use std::future::Future;
use std::ops::Bound;
use std::pin::Pin;
use std::sync::RwLock;

use super::store::{Cursor, FilePage, FileRecord, FileStatus, MetadataStore};

type FileKey = (String, String);

#[derive(Default)]
pub struct MemoryMetadataStore {
    files: RwLock<BTreeMap<FileKey, FileRecord>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn put(
        &self,
        record: FileRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut files = self.files.write().expect("rwlock poisoned");
            let key = (record.user_id.clone(), record.file_id.clone());
            files.insert(key, record);
            Ok(())
        })
    }

    fn get(
        &self,
        user_id: &str,
        file_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<FileRecord>>> + Send + '_>> {
        let key = (user_id.to_string(), file_id.to_string());
        Box::pin(async move {
            let files = self.files.read().expect("rwlock poisoned");
            Ok(files.get(&key).cloned())
        })
    }

    fn query_active(
        &self,
        user_id: &str,
        limit: u32,
        cursor: Option<&Cursor>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<FilePage>> + Send + '_>> {
        // Partition range: from (user_id, "") up to the cursor, or up to the
        // first key of the next possible user id.
        let lower = Bound::Included((user_id.to_string(), String::new()));
        let upper = match cursor {
            Some(c) => Bound::Excluded((user_id.to_string(), c.file_id.clone())),
            None => Bound::Excluded((format!("{user_id}\0"), String::new())),
        };
        Box::pin(async move {
            let files = self.files.read().expect("rwlock poisoned");
            let limit = limit as usize;

            // Fetch one extra record to learn whether another page exists.
            let mut records: Vec<FileRecord> = files
                .range((lower, upper))
                .rev()
                .map(|(_, record)| record)
                .filter(|record| record.status == FileStatus::Active)
                .take(limit + 1)
                .cloned()
                .collect();

            let next_cursor = if records.len() > limit {
                records.truncate(limit);
                records.last().map(Cursor::after)
            } else {
                None
            };

            Ok(FilePage {
                records,
                next_cursor,
            })
        })
    }

    fn update_status_deleted(
        &self,
        user_id: &str,
        file_id: &str,
        deleted_at: i64,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let key = (user_id.to_string(), file_id.to_string());
        Box::pin(async move {
            let mut files = self.files.write().expect("rwlock poisoned");
            if let Some(record) = files.get_mut(&key) {
                record.status = FileStatus::Deleted;
                record.deleted_at = Some(deleted_at);
            }
            Ok(())
        })
    }

    fn update_shared(
        &self,
        user_id: &str,
        file_id: &str,
        shared_at: i64,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let key = (user_id.to_string(), file_id.to_string());
        Box::pin(async move {
            let mut files = self.files.write().expect("rwlock poisoned");
            if let Some(record) = files.get_mut(&key) {
                record.shared = true;
                record.last_shared_at = Some(shared_at);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::store::test_support::{exercise_store, make_record};

    #[tokio::test]
    async fn test_store_contract() {
        exercise_store(&MemoryMetadataStore::new()).await;
    }

    #[tokio::test]
    async fn test_updates_on_missing_record_are_noops() {
        let store = MemoryMetadataStore::new();
        store.update_status_deleted("alice", "nope", 1).await.unwrap();
        store.update_shared("alice", "nope", 1).await.unwrap();
        assert!(store.get("alice", "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_limit_counts_only_active_records() {
        let store = MemoryMetadataStore::new();
        for id in ["a1", "a2", "a3"] {
            store.put(make_record("alice", id, "f", 1)).await.unwrap();
        }
        store.update_status_deleted("alice", "a3", 1).await.unwrap();
        store.update_status_deleted("alice", "a2", 1).await.unwrap();

        let page = store.query_active("alice", 1, None).await.unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].file_id, "a1");
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_query_stays_inside_the_owner_partition() {
        let store = MemoryMetadataStore::new();
        for (user, id) in [("al", "f1"), ("alice", "f2"), ("al", "f3"), ("bob", "f4")] {
            store.put(make_record(user, id, "f", 1)).await.unwrap();
        }

        let page = store.query_active("al", 10, None).await.unwrap();
        let ids: Vec<&str> = page.records.iter().map(|r| r.file_id.as_str()).collect();
        assert_eq!(ids, vec!["f3", "f1"]);

        let first = store.query_active("al", 1, None).await.unwrap();
        assert_eq!(first.records[0].file_id, "f3");
        let cursor = first.next_cursor.unwrap();
        let second = store.query_active("al", 1, Some(&cursor)).await.unwrap();
        assert_eq!(second.records.len(), 1);
        assert_eq!(second.records[0].file_id, "f1");
        assert!(second.next_cursor.is_none());

        assert!(store.query_active("carol", 10, None).await.unwrap().records.is_empty());
    }
}
