//! Backend configuration types.
//!
//! Each section is a discriminated union keyed by `type`.

use std::path::PathBuf;

use serde::Deserialize;

use crate::archive::DEFAULT_PREFIX;
use crate::storage::MAX_BATCH_WRITE_ITEMS;

/// Record store discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    #[default]
    Dynamo,
    /// In-memory store; records are dropped at exit.
    Memory,
}

/// Record store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    #[serde(rename = "type")]
    pub store_type: StoreType,
    /// Table name (dynamo).
    pub table_name: String,
    /// AWS region. Falls back to the SDK's default chain when unset.
    pub region: Option<String>,
    /// Endpoint override for DynamoDB Local or LocalStack.
    pub endpoint: Option<String>,
    /// Records per batched write. At most 25.
    pub chunk_size: usize,
    /// Re-submissions of unprocessed items inside one chunk write.
    pub max_unprocessed_retries: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_type: StoreType::default(),
            table_name: String::new(),
            region: None,
            endpoint: None,
            chunk_size: MAX_BATCH_WRITE_ITEMS,
            max_unprocessed_retries: 3,
        }
    }
}

/// Rejection notifier discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierType {
    Sns,
    #[default]
    Noop,
}

/// Rejection notifier configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    #[serde(rename = "type")]
    pub notifier_type: NotifierType,
    pub topic_arn: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
}

/// Archive discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveType {
    S3,
    #[default]
    Filesystem,
}

/// Raw batch archive configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    #[serde(rename = "type")]
    pub archive_type: ArchiveType,
    /// Bucket name (s3).
    pub bucket: String,
    /// Key prefix for archived objects.
    pub prefix: String,
    pub region: Option<String>,
    /// Endpoint override for LocalStack or MinIO.
    pub endpoint: Option<String>,
    /// Root directory (filesystem).
    pub base_path: PathBuf,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            archive_type: ArchiveType::default(),
            bucket: String::new(),
            prefix: DEFAULT_PREFIX.to_string(),
            region: None,
            endpoint: None,
            base_path: PathBuf::from("./archive"),
        }
    }
}
