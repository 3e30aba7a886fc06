//! Raw batch archival.
//!
//! Every non-empty batch is written, before any validation outcome matters,
//! as one gzip-compressed object of newline-joined raw records:
//!
//! ```text
//! {prefix}/year=YYYY/month=MM/day=DD/hour=HH/batch-{unix_millis}.json.gz
//! ```
//!
//! Puts are create-only. When two batches share an arrival millisecond the
//! later one is stored as `batch-{unix_millis}-{n}.json.gz` instead of
//! replacing the earlier object.
//!
//! Objects carry `record-count` and `batch-timestamp` metadata so replay
//! tooling can verify completeness without decompressing.
//!
//! ## Storage Backends
//!
//! - `S3BlobStore` (feature: s3) - Amazon S3
//! - `FilesystemBlobStore` - Local filesystem storage
//! - `MockBlobStore` - In-memory, for tests

mod filesystem;
pub mod mock;
#[cfg(feature = "s3")]
mod s3;

pub use filesystem::FilesystemBlobStore;
pub use mock::MockBlobStore;
#[cfg(feature = "s3")]
pub use s3::S3BlobStore;

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, SecondsFormat, Timelike, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{ArchiveConfig, ArchiveType};

/// Default key prefix for archived batches.
pub const DEFAULT_PREFIX: &str = "events";

/// Metadata key: number of raw records in the object.
pub const RECORD_COUNT_KEY: &str = "record-count";
/// Metadata key: batch arrival instant (RFC 3339).
pub const BATCH_TIMESTAMP_KEY: &str = "batch-timestamp";

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_ENCODING_GZIP: &str = "gzip";

/// Keys tried per batch before giving up on a crowded millisecond.
pub const MAX_KEY_ATTEMPTS: usize = 8;

/// Errors that can occur during archival.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Failed to compress batch: {0}")]
    Compression(std::io::Error),

    #[error("Failed to store archive object: {0}")]
    StoreFailed(String),

    #[error("Archive object already exists: {0}")]
    AlreadyExists(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive backend '{0}' is not available in this build")]
    BackendUnavailable(&'static str),
}

/// Result type for archive operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// One object to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveObject {
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: &'static str,
    pub content_encoding: &'static str,
    pub metadata: HashMap<String, String>,
}

impl ArchiveObject {
    /// Value of the `record-count` metadata, if parseable.
    pub fn record_count(&self) -> Option<usize> {
        self.metadata.get(RECORD_COUNT_KEY)?.parse().ok()
    }
}

/// Blob storage backend.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write one object. Fails with [`ArchiveError::AlreadyExists`] when the
    /// key is taken; existing objects are never replaced.
    async fn put_object(&self, object: ArchiveObject) -> Result<()>;

    /// Backend name for logging.
    fn storage_type(&self) -> &'static str;
}

/// Build the object key for a batch.
pub fn object_key(prefix: &str, batch_time: DateTime<Utc>) -> String {
    numbered_object_key(prefix, batch_time, 0)
}

/// Object key for the `n`-th batch sharing an arrival millisecond.
/// `n == 0` is the plain key.
pub fn numbered_object_key(prefix: &str, batch_time: DateTime<Utc>, n: usize) -> String {
    let suffix = if n == 0 { String::new() } else { format!("-{}", n) };
    format!(
        "{}/year={:04}/month={:02}/day={:02}/hour={:02}/batch-{}{}.json.gz",
        prefix.trim_end_matches('/'),
        batch_time.year(),
        batch_time.month(),
        batch_time.day(),
        batch_time.hour(),
        batch_time.timestamp_millis(),
        suffix
    )
}

/// Gzip-compress bytes.
pub fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Compresses raw batches and writes them to a [`BlobStore`].
#[derive(Clone)]
pub struct Archiver {
    store: Arc<dyn BlobStore>,
    prefix: String,
}

impl Archiver {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }

    /// Set the key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Build the compressed object for a batch of raw payloads.
    pub fn build_object(
        &self,
        raw_records: &[String],
        batch_time: DateTime<Utc>,
    ) -> Result<ArchiveObject> {
        let joined = raw_records.join("\n");
        let body = compress(joined.as_bytes()).map_err(ArchiveError::Compression)?;

        let mut metadata = HashMap::new();
        metadata.insert(RECORD_COUNT_KEY.to_string(), raw_records.len().to_string());
        metadata.insert(
            BATCH_TIMESTAMP_KEY.to_string(),
            batch_time.to_rfc3339_opts(SecondsFormat::Millis, true),
        );

        Ok(ArchiveObject {
            key: object_key(&self.prefix, batch_time),
            body,
            content_type: CONTENT_TYPE_JSON,
            content_encoding: CONTENT_ENCODING_GZIP,
            metadata,
        })
    }

    /// Archive a batch. Best-effort: failures are logged, never returned.
    pub async fn archive(&self, raw_records: Vec<String>, batch_time: DateTime<Utc>) {
        if raw_records.is_empty() {
            debug!("Empty batch, nothing to archive");
            return;
        }

        let object = match self.build_object(&raw_records, batch_time) {
            Ok(object) => object,
            Err(e) => {
                error!(records = raw_records.len(), error = %e, "Failed to build archive object");
                return;
            }
        };
        let size = object.body.len();

        for n in 0..MAX_KEY_ATTEMPTS {
            let key = numbered_object_key(&self.prefix, batch_time, n);
            let attempt = ArchiveObject {
                key: key.clone(),
                ..object.clone()
            };

            match self.store.put_object(attempt).await {
                Ok(()) => {
                    debug!(
                        key = %key,
                        records = raw_records.len(),
                        compressed_size = size,
                        backend = self.store.storage_type(),
                        "Archived raw batch"
                    );
                    return;
                }
                Err(ArchiveError::AlreadyExists(_)) => {
                    debug!(key = %key, "Archive key taken, trying the next one");
                }
                Err(e) => {
                    warn!(
                        key = %object.key,
                        records = raw_records.len(),
                        error = %e,
                        "Failed to archive raw batch"
                    );
                    return;
                }
            }
        }

        warn!(
            key = %object.key,
            records = raw_records.len(),
            attempts = MAX_KEY_ATTEMPTS,
            "Failed to archive raw batch, every candidate key is taken"
        );
    }
}

/// Initialize the blob store based on configuration.
pub async fn init_blob_store(config: &ArchiveConfig) -> Result<Arc<dyn BlobStore>> {
    match config.archive_type {
        #[cfg(feature = "s3")]
        ArchiveType::S3 => {
            info!(
                bucket = %config.bucket,
                region = ?config.region,
                endpoint = ?config.endpoint,
                "BlobStore: s3"
            );
            let store = match &config.endpoint {
                Some(endpoint) => {
                    S3BlobStore::with_endpoint(&config.bucket, endpoint, config.region.as_deref())
                        .await?
                }
                None => S3BlobStore::new(&config.bucket, config.region.as_deref()).await?,
            };
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "s3"))]
        ArchiveType::S3 => {
            error!("S3 archive requested but 's3' feature is not enabled");
            Err(ArchiveError::BackendUnavailable("s3"))
        }
        ArchiveType::Filesystem => {
            info!(path = %config.base_path.display(), "BlobStore: filesystem");
            let store = FilesystemBlobStore::new(&config.base_path).await?;
            Ok(Arc::new(store))
        }
    }
}
