//! Durable record storage.
//!
//! This module contains:
//! - `RecordStore` trait: one batched put of up to `MAX_BATCH_WRITE_ITEMS` records
//! - `BatchWriter`: collapses duplicate keys, chunks an accepted-record list and
//!   fails on any unprocessed item
//! - Implementations: DynamoDB (feature `dynamo`), Mock
//!
//! Writes are not atomic across chunks. When a later chunk fails, earlier
//! chunks are already persisted and will be written again on redelivery.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::config::{StoreConfig, StoreType};
use crate::transform::StorageRecord;

#[cfg(feature = "dynamo")]
pub mod dynamo;
pub mod mock;

#[cfg(feature = "dynamo")]
pub use dynamo::DynamoRecordStore;
pub use mock::MockRecordStore;

/// Maximum items the store accepts in one batched write.
pub const MAX_BATCH_WRITE_ITEMS: usize = 25;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Batch write failed: {0}")]
    Write(String),

    #[error("Store left {unprocessed} of {submitted} items unprocessed in chunk {chunk}")]
    Unprocessed {
        chunk: usize,
        submitted: usize,
        unprocessed: usize,
    },

    #[error("Invalid chunk size {0} (must be 1..={max})", max = MAX_BATCH_WRITE_ITEMS)]
    InvalidChunkSize(usize),

    #[error("Failed to encode record: {0}")]
    Encoding(String),

    #[error("Storage backend '{0}' is not available in this build")]
    BackendUnavailable(&'static str),
}

/// Batched put interface to the durable store.
///
/// Implementations:
/// - `DynamoRecordStore`: `BatchWriteItem` with internal retry of unprocessed items
/// - `MockRecordStore`: In-memory mock for testing
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Write one chunk in a single batched operation.
    ///
    /// Keys within one chunk must be distinct; the store may reject the
    /// whole chunk otherwise.
    ///
    /// Returns the records the store could not accept after its own
    /// internal retries. An empty vector means the whole chunk was written.
    async fn put_batch(&self, records: &[StorageRecord]) -> Result<Vec<StorageRecord>>;
}

/// Counts for a completed [`BatchWriter::write_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub chunks: usize,
    /// Distinct records written.
    pub records: usize,
    /// Earlier records dropped because a later record had the same key.
    pub superseded: usize,
}

/// Writes accepted records in store-sized chunks.
#[derive(Clone)]
pub struct BatchWriter {
    store: Arc<dyn RecordStore>,
    chunk_size: usize,
}

impl BatchWriter {
    /// Create a writer using the store's maximum batch size.
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            chunk_size: MAX_BATCH_WRITE_ITEMS,
        }
    }

    /// Use a smaller chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 || chunk_size > MAX_BATCH_WRITE_ITEMS {
            return Err(StorageError::InvalidChunkSize(chunk_size));
        }
        self.chunk_size = chunk_size;
        Ok(self)
    }

    /// Write every record, one store call per chunk.
    ///
    /// Records sharing a key collapse to the last one, as sequential puts
    /// would. Stops at the first chunk that fails or leaves items
    /// unprocessed. The caller must then treat the entire batch as
    /// undelivered.
    pub async fn write_all(&self, records: &[StorageRecord]) -> Result<WriteSummary> {
        let distinct = last_per_key(records);
        let mut summary = WriteSummary {
            superseded: records.len() - distinct.len(),
            ..Default::default()
        };
        if summary.superseded > 0 {
            warn!(
                records = records.len(),
                superseded = summary.superseded,
                "Batch repeats record keys, keeping the last record per key"
            );
        }

        for (index, chunk) in distinct.chunks(self.chunk_size).enumerate() {
            let unprocessed = self.store.put_batch(chunk).await.map_err(|e| {
                error!(chunk = index, size = chunk.len(), error = %e, "Chunk write failed");
                e
            })?;

            if !unprocessed.is_empty() {
                error!(
                    chunk = index,
                    submitted = chunk.len(),
                    unprocessed = unprocessed.len(),
                    "Store left items unprocessed"
                );
                return Err(StorageError::Unprocessed {
                    chunk: index,
                    submitted: chunk.len(),
                    unprocessed: unprocessed.len(),
                });
            }

            summary.chunks += 1;
            summary.records += chunk.len();
            debug!(chunk = index, size = chunk.len(), "Chunk written");
        }

        Ok(summary)
    }
}

/// Drop every record whose key reappears later, keeping input order.
fn last_per_key(records: &[StorageRecord]) -> Vec<StorageRecord> {
    let last: HashMap<(&str, &str), usize> = records
        .iter()
        .enumerate()
        .map(|(index, record)| (record.key(), index))
        .collect();

    records
        .iter()
        .enumerate()
        .filter(|(index, record)| last.get(&record.key()) == Some(index))
        .map(|(_, record)| record.clone())
        .collect()
}

/// Initialize the record store based on configuration.
pub async fn init_record_store(config: &StoreConfig) -> Result<Arc<dyn RecordStore>> {
    match config.store_type {
        #[cfg(feature = "dynamo")]
        StoreType::Dynamo => {
            info!(
                table = %config.table_name,
                region = ?config.region,
                endpoint = ?config.endpoint,
                "RecordStore: dynamo"
            );
            let store = DynamoRecordStore::new(
                &config.table_name,
                config.region.as_deref(),
                config.endpoint.as_deref(),
            )
            .await?
            .with_max_retries(config.max_unprocessed_retries);
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "dynamo"))]
        StoreType::Dynamo => {
            error!("DynamoDB store requested but 'dynamo' feature is not enabled");
            Err(StorageError::BackendUnavailable("dynamo"))
        }
        StoreType::Memory => {
            info!("RecordStore: memory (records are not persisted)");
            Ok(Arc::new(MockRecordStore::new()))
        }
    }
}
