//! Mock record store for testing and the `memory` store type.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{RecordStore, Result, StorageError};
use crate::transform::StorageRecord;

/// Mock record store that keeps written items in memory.
///
/// Items are keyed by `(entity_id, entity_type)`, so writing the same key
/// in two calls overwrites, matching the real store's put semantics. A key
/// repeated inside one call fails the whole call, as a batched write does.
#[derive(Default)]
pub struct MockRecordStore {
    items: RwLock<HashMap<(String, String), StorageRecord>>,
    chunks: RwLock<Vec<Vec<StorageRecord>>>,
    fail_on_put: RwLock<bool>,
    /// Call index -> number of trailing items to report unprocessed.
    unprocessed_plan: RwLock<HashMap<usize, usize>>,
}

impl MockRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_put(&self, fail: bool) {
        *self.fail_on_put.write().await = fail;
    }

    /// Report the last `count` items of the `call`-th put (0-based) as unprocessed.
    pub async fn set_unprocessed_on_call(&self, call: usize, count: usize) {
        self.unprocessed_plan.write().await.insert(call, count);
    }

    /// Number of `put_batch` calls received.
    pub async fn put_calls(&self) -> usize {
        self.chunks.read().await.len()
    }

    /// Every chunk received, in call order.
    pub async fn chunks(&self) -> Vec<Vec<StorageRecord>> {
        self.chunks.read().await.clone()
    }

    /// Number of distinct keys stored.
    pub async fn stored_count(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn get(&self, entity_id: &str, entity_type: &str) -> Option<StorageRecord> {
        self.items
            .read()
            .await
            .get(&(entity_id.to_string(), entity_type.to_string()))
            .cloned()
    }
}

#[async_trait]
impl RecordStore for MockRecordStore {
    async fn put_batch(&self, records: &[StorageRecord]) -> Result<Vec<StorageRecord>> {
        if *self.fail_on_put.read().await {
            return Err(StorageError::Write("Mock put failure".to_string()));
        }

        let mut seen = HashSet::with_capacity(records.len());
        if let Some(repeat) = records.iter().find(|record| !seen.insert(record.key())) {
            return Err(StorageError::Write(format!(
                "Provided list of item keys contains duplicates: {}/{}",
                repeat.entity_id, repeat.entity_type
            )));
        }

        let call = {
            let mut chunks = self.chunks.write().await;
            chunks.push(records.to_vec());
            chunks.len() - 1
        };

        let unprocessed_count = self
            .unprocessed_plan
            .read()
            .await
            .get(&call)
            .copied()
            .unwrap_or(0)
            .min(records.len());
        let (accepted, unprocessed) = records.split_at(records.len() - unprocessed_count);

        let mut items = self.items.write().await;
        for record in accepted {
            items.insert(
                (record.entity_id.clone(), record.entity_type.clone()),
                record.clone(),
            );
        }

        Ok(unprocessed.to_vec())
    }
}
