//! AWS DynamoDB metadata store backend.
//!
//! One item per file in a table keyed by partition key `userId` and sort
//! key `fileId`.  Attribute names are camelCase:
//! `fileName`, `contentType`, `fileSize` (N), `storageKey`,
//! `uploadDate` (N), `status`, `shared` (BOOL), `lastSharedAt` (N),
//! `deletedAt` (N).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use anyhow::Context;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::operation::update_item::UpdateItemError;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;

use super::store::{Cursor, FilePage, FileRecord, FileStatus, MetadataStore};
use crate::config::DynamoDbConfig;

type Item = HashMap<String, AttributeValue>;

fn key(user_id: &str, file_id: &str) -> Item {
    HashMap::from([
        ("userId".to_string(), AttributeValue::S(user_id.to_string())),
        ("fileId".to_string(), AttributeValue::S(file_id.to_string())),
    ])
}

fn record_to_item(record: FileRecord) -> Item {
    let mut item = key(&record.user_id, &record.file_id);
    item.insert("fileName".to_string(), AttributeValue::S(record.file_name));
    item.insert(
        "contentType".to_string(),
        AttributeValue::S(record.content_type),
    );
    item.insert(
        "fileSize".to_string(),
        AttributeValue::N(record.file_size.to_string()),
    );
    item.insert(
        "storageKey".to_string(),
        AttributeValue::S(record.storage_key),
    );
    item.insert(
        "uploadDate".to_string(),
        AttributeValue::N(record.upload_date.to_string()),
    );
    item.insert(
        "status".to_string(),
        AttributeValue::S(record.status.as_str().to_string()),
    );
    item.insert("shared".to_string(), AttributeValue::Bool(record.shared));
    if let Some(at) = record.last_shared_at {
        item.insert("lastSharedAt".to_string(), AttributeValue::N(at.to_string()));
    }
    if let Some(at) = record.deleted_at {
        item.insert("deletedAt".to_string(), AttributeValue::N(at.to_string()));
    }
    item
}

fn string_attr(item: &Item, name: &str) -> anyhow::Result<String> {
    match item.get(name) {
        Some(AttributeValue::S(s)) => Ok(s.clone()),
        _ => anyhow::bail!("item is missing string attribute {name}"),
    }
}

fn number_attr<T: std::str::FromStr>(item: &Item, name: &str) -> anyhow::Result<Option<T>> {
    match item.get(name) {
        Some(AttributeValue::N(n)) => n
            .parse()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("attribute {name} is not a valid number: {n}")),
        _ => Ok(None),
    }
}

fn item_to_record(item: &Item) -> anyhow::Result<FileRecord> {
    let status = string_attr(item, "status")?.parse::<FileStatus>()?;
    Ok(FileRecord {
        user_id: string_attr(item, "userId")?,
        file_id: string_attr(item, "fileId")?,
        file_name: string_attr(item, "fileName")?,
        content_type: string_attr(item, "contentType")
            .unwrap_or_else(|_| "application/octet-stream".to_string()),
        file_size: number_attr(item, "fileSize")?.unwrap_or(0),
        storage_key: string_attr(item, "storageKey")?,
        upload_date: number_attr(item, "uploadDate")?.unwrap_or(0),
        status,
        shared: matches!(item.get("shared"), Some(AttributeValue::Bool(true))),
        last_shared_at: number_attr(item, "lastSharedAt")?,
        deleted_at: number_attr(item, "deletedAt")?,
    })
}

pub struct DynamoDbMetadataStore {
    client: Client,
    table_name: String,
}

impl DynamoDbMetadataStore {
    pub async fn new(config: &DynamoDbConfig) -> anyhow::Result<Self> {
        let mut builder = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Some(region) = &config.region {
            builder = builder.region(aws_config::Region::new(region.clone()));
        }

        if let Some(endpoint_url) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }

        let cfg = builder.load().await;
        let client = Client::new(&cfg);

        Ok(Self {
            client,
            table_name: config.table.clone(),
        })
    }
}

impl MetadataStore for DynamoDbMetadataStore {
    fn put(
        &self,
        record: FileRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.client
                .put_item()
                .table_name(&self.table_name)
                .set_item(Some(record_to_item(record)))
                .send()
                .await?;
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
            let result = self
                .client
                .get_item()
                .table_name(&self.table_name)
                .set_key(Some(key(&user_id, &file_id)))
                .send()
                .await?;

            result
                .item()
                .map(|item| item_to_record(item).context("decoding file item"))
                .transpose()
        })
    }

    fn query_active(
        &self,
        user_id: &str,
        limit: u32,
        cursor: Option<&Cursor>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<FilePage>> + Send + '_>> {
        let user_id = user_id.to_string();
        let start_key = cursor.map(|c| key(&c.user_id, &c.file_id));
        Box::pin(async move {
            fill_page(limit as usize, start_key, |exclusive_start_key| {
                let request = self
                    .client
                    .query()
                    .table_name(&self.table_name)
                    .key_condition_expression("userId = :userId")
                    .filter_expression("#status = :active")
                    .expression_attribute_names("#status", "status")
                    .expression_attribute_values(":userId", AttributeValue::S(user_id.clone()))
                    .expression_attribute_values(
                        ":active",
                        AttributeValue::S(FileStatus::Active.as_str().to_string()),
                    )
                    .scan_index_forward(false)
                    .limit(limit as i32 + 1)
                    .set_exclusive_start_key(exclusive_start_key);
                async move {
                    let output = request.send().await?;
                    Ok(QueryPage {
                        items: output.items().to_vec(),
                        last_evaluated_key: output.last_evaluated_key().cloned(),
                    })
                }
            })
            .await
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
            self.client
                .update_item()
                .table_name(&self.table_name)
                .set_key(Some(key(&user_id, &file_id)))
                .update_expression("SET #status = :status, deletedAt = :deletedAt")
                .expression_attribute_names("#status", "status")
                .expression_attribute_values(
                    ":status",
                    AttributeValue::S(FileStatus::Deleted.as_str().to_string()),
                )
                .expression_attribute_values(":deletedAt", AttributeValue::N(deleted_at.to_string()))
                .condition_expression("attribute_exists(fileId)")
                .send()
                .await
                .map(|_| ())
                .or_else(ignore_missing_item)
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
            self.client
                .update_item()
                .table_name(&self.table_name)
                .set_key(Some(key(&user_id, &file_id)))
                .update_expression("SET shared = :shared, lastSharedAt = :sharedAt")
                .expression_attribute_values(":shared", AttributeValue::Bool(true))
                .expression_attribute_values(":sharedAt", AttributeValue::N(shared_at.to_string()))
                .condition_expression("attribute_exists(fileId)")
                .send()
                .await
                .map(|_| ())
                .or_else(ignore_missing_item)
        })
    }
}

/// One `Query` response: the items that passed the filter and the key to
/// resume from, if the partition has more.
struct QueryPage {
    items: Vec<Item>,
    last_evaluated_key: Option<Item>,
}

/// Build a page of `limit` records from successive `Query` calls.
///
/// The `active` filter runs after `Limit` is applied, so one response can
/// hold fewer matches than asked for (even none). Keep reading until one
/// record past the page is seen or the partition runs out. The cursor is
/// the last record kept, not the service's `LastEvaluatedKey`.
async fn fill_page<F, Fut>(
    limit: usize,
    start_key: Option<Item>,
    mut fetch: F,
) -> anyhow::Result<FilePage>
where
    F: FnMut(Option<Item>) -> Fut,
    Fut: Future<Output = anyhow::Result<QueryPage>>,
{
    let mut records: Vec<FileRecord> = Vec::new();
    let mut exclusive_start_key = start_key;

    while records.len() <= limit {
        let page = fetch(exclusive_start_key.take()).await?;
        for item in &page.items {
            records.push(item_to_record(item).context("decoding file item")?);
            if records.len() > limit {
                break;
            }
        }
        match page.last_evaluated_key {
            Some(last) => exclusive_start_key = Some(last),
            None => break,
        }
    }

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
}

/// Updates on a missing item are no-ops, matching the other backends.
fn ignore_missing_item(err: SdkError<UpdateItemError>) -> anyhow::Result<()> {
    let service_err = err.into_service_error();
    if service_err.is_conditional_check_failed_exception() {
        Ok(())
    } else {
        Err(anyhow::anyhow!("DynamoDB update_item: {service_err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::store::test_support::make_record;

    #[test]
    fn test_item_layout_uses_camel_case_attributes() {
        let mut record = make_record("alice", "f1", "a.txt", 12);
        record.last_shared_at = Some(7);
        let item = record_to_item(record);

        assert_eq!(item.get("userId"), Some(&AttributeValue::S("alice".into())));
        assert_eq!(item.get("fileId"), Some(&AttributeValue::S("f1".into())));
        assert_eq!(item.get("fileSize"), Some(&AttributeValue::N("12".into())));
        assert_eq!(item.get("status"), Some(&AttributeValue::S("active".into())));
        assert_eq!(item.get("shared"), Some(&AttributeValue::Bool(false)));
        assert_eq!(item.get("lastSharedAt"), Some(&AttributeValue::N("7".into())));
        assert!(!item.contains_key("deletedAt"));
    }

    #[test]
    fn test_item_decodes_back_to_record() {
        let mut record = make_record("alice", "f1", "a.txt", 12);
        record.status = FileStatus::Deleted;
        record.deleted_at = Some(55);
        let decoded = item_to_record(&record_to_item(record.clone())).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_item_without_optional_attributes() {
        let mut item = record_to_item(make_record("alice", "f1", "a.txt", 1));
        item.remove("shared");
        item.remove("contentType");
        let decoded = item_to_record(&item).unwrap();
        assert!(!decoded.shared);
        assert_eq!(decoded.content_type, "application/octet-stream");
    }

    #[test]
    fn test_item_with_bad_status_is_rejected() {
        let mut item = record_to_item(make_record("alice", "f1", "a.txt", 1));
        item.insert("status".to_string(), AttributeValue::S("archived".into()));
        assert!(item_to_record(&item).is_err());

        item.remove("status");
        assert!(item_to_record(&item).is_err());
    }

    // -- Page filling -----------------------------------------------------------

    fn items(ids: &[&str]) -> Vec<Item> {
        ids.iter()
            .map(|id| record_to_item(make_record("alice", id, "f", 1)))
            .collect()
    }

    /// Replays canned `Query` responses in order and records the start key
    /// each call was made with.
    async fn fill_from(
        limit: usize,
        start_key: Option<Item>,
        responses: Vec<QueryPage>,
    ) -> (FilePage, Vec<Option<Item>>) {
        let mut responses = responses.into_iter();
        let mut calls = Vec::new();
        let page = fill_page(limit, start_key, |start| {
            calls.push(start);
            let response = responses.next().expect("unexpected extra query");
            std::future::ready(Ok(response))
        })
        .await
        .unwrap();
        (page, calls)
    }

    fn ids(page: &FilePage) -> Vec<&str> {
        page.records.iter().map(|r| r.file_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_fill_page_reads_past_filtered_out_responses() {
        let (page, calls) = fill_from(
            2,
            None,
            vec![
                QueryPage {
                    items: vec![],
                    last_evaluated_key: Some(key("alice", "f9")),
                },
                QueryPage {
                    items: items(&["f8", "f7", "f6"]),
                    last_evaluated_key: Some(key("alice", "f6")),
                },
            ],
        )
        .await;

        assert_eq!(ids(&page), vec!["f8", "f7"]);
        let cursor = page.next_cursor.unwrap();
        assert_eq!(cursor.file_id, "f7");
        assert_eq!(calls, vec![None, Some(key("alice", "f9"))]);
    }

    #[tokio::test]
    async fn test_fill_page_stops_inside_a_response() {
        let (page, calls) = fill_from(
            1,
            Some(key("alice", "f9")),
            vec![QueryPage {
                items: items(&["f5", "f4", "f3"]),
                last_evaluated_key: Some(key("alice", "f3")),
            }],
        )
        .await;

        assert_eq!(ids(&page), vec!["f5"]);
        // The cursor is the last kept record, not the service key.
        assert_eq!(page.next_cursor.unwrap().file_id, "f5");
        assert_eq!(calls, vec![Some(key("alice", "f9"))]);
    }

    #[tokio::test]
    async fn test_fill_page_ends_with_the_partition() {
        let (page, calls) = fill_from(
            5,
            None,
            vec![
                QueryPage {
                    items: items(&["f3", "f2"]),
                    last_evaluated_key: Some(key("alice", "f2")),
                },
                QueryPage {
                    items: items(&["f1"]),
                    last_evaluated_key: None,
                },
            ],
        )
        .await;

        assert_eq!(ids(&page), vec!["f3", "f2", "f1"]);
        assert!(page.next_cursor.is_none());
        assert_eq!(calls.len(), 2);
    }

    #[tokio::test]
    async fn test_fill_page_exact_fit_has_no_cursor() {
        let (page, _) = fill_from(
            2,
            None,
            vec![QueryPage {
                items: items(&["f2", "f1"]),
                last_evaluated_key: None,
            }],
        )
        .await;

        assert_eq!(ids(&page), vec!["f2", "f1"]);
        assert!(page.next_cursor.is_none());
    }
}
