//! DynamoDB RecordStore implementation.
//!
//! Table schema:
//! - PK: `entity_id` (String)
//! - SK: `entity_type` (String)
//! - `expires_at`: TTL attribute (Number, unix seconds)
//!
//! Each chunk is one `BatchWriteItem` call. Items DynamoDB reports back in
//! `UnprocessedItems` (throttling, capacity) are re-submitted with backoff;
//! whatever is still unprocessed after the retry budget is returned to the
//! caller.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::{AttributeValue, PutRequest, WriteRequest};
use aws_sdk_dynamodb::Client;
use backon::{BackoffBuilder, ExponentialBuilder};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{RecordStore, Result, StorageError};
use crate::transform::StorageRecord;

/// Default number of re-submissions of unprocessed items.
pub const DEFAULT_MAX_RETRIES: usize = 3;

/// Magnitude range of the store's number type. Values outside it are kept
/// as their decimal text.
const MIN_NUMBER_MAGNITUDE: f64 = 1e-130;
const MAX_NUMBER_MAGNITUDE: f64 = 1e126;

/// DynamoDB implementation of RecordStore.
pub struct DynamoRecordStore {
    client: Client,
    table_name: String,
    max_retries: usize,
}

impl DynamoRecordStore {
    /// Create a new DynamoDB record store.
    ///
    /// Uses the default credential chain. `endpoint_url` targets
    /// DynamoDB Local or LocalStack.
    pub async fn new(
        table_name: impl Into<String>,
        region: Option<&str>,
        endpoint_url: Option<&str>,
    ) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region.to_string()));
        }
        let config = loader.load().await;

        let client = if let Some(endpoint) = endpoint_url {
            let dynamo_config = aws_sdk_dynamodb::config::Builder::from(&config)
                .endpoint_url(endpoint)
                .build();
            Client::from_conf(dynamo_config)
        } else {
            Client::new(&config)
        };

        let table_name = table_name.into();
        info!(table = %table_name, "Connected to DynamoDB for records");

        Ok(Self::with_client(client, table_name))
    }

    /// Create with explicit client (for testing).
    pub fn with_client(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Set how many times unprocessed items are re-submitted.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(50))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(self.max_retries)
            .with_jitter()
    }
}

#[async_trait]
impl RecordStore for DynamoRecordStore {
    async fn put_batch(&self, records: &[StorageRecord]) -> Result<Vec<StorageRecord>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut pending = records
            .iter()
            .map(write_request)
            .collect::<Result<Vec<_>>>()?;
        let mut delays = self.backoff().build();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let submitted = pending.len();
            let output = self
                .client
                .batch_write_item()
                .request_items(&self.table_name, std::mem::take(&mut pending))
                .send()
                .await
                .map_err(|e| {
                    StorageError::Write(format!("DynamoDB batch_write_item failed: {}", e))
                })?;

            pending = output
                .unprocessed_items()
                .and_then(|items| items.get(&self.table_name))
                .cloned()
                .unwrap_or_default();

            if pending.is_empty() {
                debug!(
                    table = %self.table_name,
                    submitted = submitted,
                    attempt = attempt,
                    "Stored chunk in DynamoDB"
                );
                return Ok(Vec::new());
            }

            match delays.next() {
                Some(delay) => {
                    warn!(
                        table = %self.table_name,
                        unprocessed = pending.len(),
                        attempt = attempt,
                        "DynamoDB returned unprocessed items, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                None => break,
            }
        }

        let unprocessed_keys: HashSet<(String, String)> =
            pending.iter().filter_map(request_key).collect();

        Ok(records
            .iter()
            .filter(|r| unprocessed_keys.contains(&(r.entity_id.clone(), r.entity_type.clone())))
            .cloned()
            .collect())
    }
}

fn write_request(record: &StorageRecord) -> Result<WriteRequest> {
    let put = PutRequest::builder()
        .set_item(Some(record_to_item(record)))
        .build()
        .map_err(|e| StorageError::Encoding(e.to_string()))?;
    Ok(WriteRequest::builder().put_request(put).build())
}

fn request_key(request: &WriteRequest) -> Option<(String, String)> {
    let item = request.put_request()?.item();
    match (item.get("entity_id"), item.get("entity_type")) {
        (Some(AttributeValue::S(id)), Some(AttributeValue::S(kind))) => {
            Some((id.clone(), kind.clone()))
        }
        _ => None,
    }
}

/// Encode a storage record as a DynamoDB item.
pub fn record_to_item(record: &StorageRecord) -> HashMap<String, AttributeValue> {
    let mut item = HashMap::new();
    item.insert("entity_id".to_string(), AttributeValue::S(record.entity_id.clone()));
    item.insert("entity_type".to_string(), AttributeValue::S(record.entity_type.clone()));
    item.insert("timestamp".to_string(), AttributeValue::S(record.timestamp.clone()));
    item.insert("event_type".to_string(), AttributeValue::S(record.event_type.clone()));
    item.insert("payload".to_string(), to_attribute_value(&record.payload));
    if let Some(metrics) = &record.metrics {
        item.insert("metrics".to_string(), to_attribute_value(metrics));
    }
    if let Some(metadata) = &record.metadata {
        item.insert("metadata".to_string(), to_attribute_value(metadata));
    }
    item.insert(
        "expires_at".to_string(),
        AttributeValue::N(record.expires_at.to_string()),
    );
    item
}

/// Convert a JSON value to a DynamoDB attribute value.
///
/// Numbers the store cannot represent are written as strings.
pub fn to_attribute_value(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) if representable(n) => AttributeValue::N(n.to_string()),
        Value::Number(n) => AttributeValue::S(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(items) => AttributeValue::L(items.iter().map(to_attribute_value).collect()),
        Value::Object(fields) => AttributeValue::M(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), to_attribute_value(v)))
                .collect(),
        ),
    }
}

fn representable(n: &serde_json::Number) -> bool {
    if n.is_i64() || n.is_u64() {
        return true;
    }
    match n.as_f64() {
        Some(f) if f == 0.0 => true,
        Some(f) => (MIN_NUMBER_MAGNITUDE..MAX_NUMBER_MAGNITUDE).contains(&f.abs()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> StorageRecord {
        StorageRecord {
            entity_id: "stu_1234".to_string(),
            entity_type: "student".to_string(),
            timestamp: "2024-03-01T12:00:00Z".to_string(),
            event_type: "customer_health_update".to_string(),
            payload: json!({"health_score": 64.5, "flags": ["at_risk", null], "active": true}),
            metrics: Some(json!({"iops": 12})),
            metadata: None,
            expires_at: 1_711_886_400,
        }
    }

    #[test]
    fn test_record_to_item_keys_and_ttl() {
        let item = record_to_item(&record());

        assert_eq!(item.get("entity_id"), Some(&AttributeValue::S("stu_1234".to_string())));
        assert_eq!(item.get("entity_type"), Some(&AttributeValue::S("student".to_string())));
        assert_eq!(item.get("expires_at"), Some(&AttributeValue::N("1711886400".to_string())));
        assert!(item.contains_key("metrics"));
        assert!(!item.contains_key("metadata"));
    }

    #[test]
    fn test_nested_json_conversion() {
        let value = to_attribute_value(&json!({"a": [1, "x", null, false]}));
        let AttributeValue::M(fields) = value else {
            panic!("Expected map");
        };
        assert_eq!(
            fields.get("a"),
            Some(&AttributeValue::L(vec![
                AttributeValue::N("1".to_string()),
                AttributeValue::S("x".to_string()),
                AttributeValue::Null(true),
                AttributeValue::Bool(false),
            ]))
        );
    }

    #[test]
    fn test_out_of_range_numbers_become_strings() {
        assert_eq!(to_attribute_value(&json!(1e200)), AttributeValue::S("1e200".to_string()));
        assert_eq!(to_attribute_value(&json!(-1e200)), AttributeValue::S("-1e200".to_string()));
        assert_eq!(to_attribute_value(&json!(1e-200)), AttributeValue::S("1e-200".to_string()));

        assert_eq!(to_attribute_value(&json!(64.5)), AttributeValue::N("64.5".to_string()));
        assert_eq!(to_attribute_value(&json!(0.0)), AttributeValue::N("0.0".to_string()));
        assert_eq!(
            to_attribute_value(&json!(u64::MAX)),
            AttributeValue::N(u64::MAX.to_string())
        );
        assert!(matches!(to_attribute_value(&json!(1e125)), AttributeValue::N(_)));
    }

    #[test]
    fn test_request_key_roundtrip() {
        let request = write_request(&record()).unwrap();
        assert_eq!(
            request_key(&request),
            Some(("stu_1234".to_string(), "student".to_string()))
        );
    }
}
