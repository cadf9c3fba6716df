//! SQLite-backed metadata store.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite
//! library is required.  All async trait methods are thin wrappers
//! around synchronous rusqlite calls executed under a `Mutex`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::store::{Cursor, FilePage, FileRecord, FileStatus, MetadataStore};

const SELECT_COLUMNS: &str = "user_id, file_id, file_name, content_type, file_size, storage_key,
     upload_date, status, shared, last_shared_at, deleted_at";

/// Metadata store backed by a single SQLite database file.
pub struct SqliteMetadataStore {
    /// The database connection, guarded by a mutex for Send + Sync.
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    /// Open (or create) the database at `path` and initialize the schema.
    ///
    /// Passing `":memory:"` creates an in-memory database (useful for tests).
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.apply_pragmas()?;
        store.init_db()?;
        Ok(store)
    }

    fn apply_pragmas(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Ok(())
    }

    /// Create the table and index if they do not already exist.
    /// Idempotent -- safe to call on every startup.
    fn init_db(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS files (
                user_id         TEXT NOT NULL,
                file_id         TEXT NOT NULL,
                file_name       TEXT NOT NULL,
                content_type    TEXT NOT NULL DEFAULT 'application/octet-stream',
                file_size       INTEGER NOT NULL,
                storage_key     TEXT NOT NULL,
                upload_date     INTEGER NOT NULL,
                status          TEXT NOT NULL DEFAULT 'active',
                shared          INTEGER NOT NULL DEFAULT 0,
                last_shared_at  INTEGER,
                deleted_at      INTEGER,

                PRIMARY KEY (user_id, file_id)
            );

            CREATE INDEX IF NOT EXISTS idx_files_user_status
                ON files(user_id, status, file_id);
            ",
        )?;
        Ok(())
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let file_size: i64 = row.get(4)?;
    let status: String = row.get(7)?;
    let status = status
        .parse::<FileStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;
    let shared: i64 = row.get(8)?;
    Ok(FileRecord {
        user_id: row.get(0)?,
        file_id: row.get(1)?,
        file_name: row.get(2)?,
        content_type: row.get(3)?,
        file_size: file_size as u64,
        storage_key: row.get(5)?,
        upload_date: row.get(6)?,
        status,
        shared: shared != 0,
        last_shared_at: row.get(9)?,
        deleted_at: row.get(10)?,
    })
}

impl MetadataStore for SqliteMetadataStore {
    fn put(
        &self,
        record: FileRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                "INSERT OR REPLACE INTO files
                    (user_id, file_id, file_name, content_type, file_size, storage_key,
                     upload_date, status, shared, last_shared_at, deleted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    record.user_id,
                    record.file_id,
                    record.file_name,
                    record.content_type,
                    record.file_size as i64,
                    record.storage_key,
                    record.upload_date,
                    record.status.as_str(),
                    record.shared as i64,
                    record.last_shared_at,
                    record.deleted_at,
                ],
            )?;
            Ok(())
        })
    }

    fn get(
        &self,
        user_id: &str,
        file_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<FileRecord>>> + Send + '_>> {
        let user_id = user_id.to_string();
        let file_id = file_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let record = conn
                .query_row(
                    &format!(
                        "SELECT {SELECT_COLUMNS} FROM files WHERE user_id = ?1 AND file_id = ?2"
                    ),
                    params![user_id, file_id],
                    row_to_record,
                )
                .optional()?;
            Ok(record)
        })
    }

    fn query_active(
        &self,
        user_id: &str,
        limit: u32,
        cursor: Option<&Cursor>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<FilePage>> + Send + '_>> {
        let user_id = user_id.to_string();
        let after = cursor.map(|c| c.file_id.clone());
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");

            // Fetch one extra row to determine whether another page exists.
            let fetch_limit = limit as i64 + 1;
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM files
                 WHERE user_id = ?1 AND status = 'active'
                   AND (?2 IS NULL OR file_id < ?2)
                 ORDER BY file_id DESC
                 LIMIT ?3"
            ))?;
            let rows = stmt.query_map(params![user_id, after, fetch_limit], row_to_record)?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }

            let next_cursor = if records.len() > limit as usize {
                records.truncate(limit as usize);
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
        let user_id = user_id.to_string();
        let file_id = file_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                "UPDATE files SET status = 'deleted', deleted_at = ?3
                 WHERE user_id = ?1 AND file_id = ?2",
                params![user_id, file_id, deleted_at],
            )?;
            Ok(())
        })
    }

    fn update_shared(
        &self,
        user_id: &str,
        file_id: &str,
        shared_at: i64,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let user_id = user_id.to_string();
        let file_id = file_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                "UPDATE files SET shared = 1, last_shared_at = ?3
                 WHERE user_id = ?1 AND file_id = ?2",
                params![user_id, file_id, shared_at],
            )?;
            Ok(())
        })
    }
}
