//! File metadata layer.
//!
//! The metadata store keeps one record per uploaded file, partitioned by
//! owner.  The [`store::MetadataStore`] trait defines the interface;
//! [`memory::MemoryMetadataStore`] is the default implementation,
//! [`sqlite::SqliteMetadataStore`] persists to a local file and
//! [`dynamodb::DynamoDbMetadataStore`] targets a managed table.

pub mod dynamodb;
pub mod memory;
pub mod sqlite;
pub mod store;
