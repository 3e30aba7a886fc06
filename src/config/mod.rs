//! Application configuration.
//!
//! Aggregates the store, notifier, archive and pipeline sections into a
//! single Config struct loaded from YAML files and environment variables.

mod backends;
mod pipeline;

pub use backends::{ArchiveConfig, ArchiveType, NotifierConfig, NotifierType, StoreConfig, StoreType};
pub use pipeline::PipelineConfig;

use serde::Deserialize;

use crate::storage::MAX_BATCH_WRITE_ITEMS;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "IOPS_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "IOPS";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "IOPS_LOG";
/// Environment variable selecting the log output format (`json` or `text`).
pub const LOG_FORMAT_ENV_VAR: &str = "IOPS_LOG_FORMAT";

/// Environment variable for the record table name.
pub const TABLE_NAME_ENV_VAR: &str = "DYNAMODB_TABLE_NAME";
/// Environment variable for the rejection topic. Selects the sns notifier.
pub const TOPIC_ARN_ENV_VAR: &str = "SNS_TOPIC_ARN";
/// Environment variable for the archive bucket. Selects the s3 archive.
pub const BUCKET_ENV_VAR: &str = "S3_BUCKET_NAME";
/// Alternative environment variable for the archive bucket.
pub const ARCHIVE_BUCKET_ENV_VAR: &str = "ARCHIVE_BUCKET_NAME";
/// Environment variable for the default AWS region.
pub const REGION_ENV_VAR: &str = "AWS_REGION";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Durable record store.
    pub store: StoreConfig,
    /// Rejection channel.
    pub notifier: NotifierConfig,
    /// Raw batch archive.
    pub archive: ArchiveConfig,
    /// Orchestrator tuning.
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `AWS_REGION` as the default region of every backend
    /// 2. `config.yaml` in current directory (if exists)
    /// 3. File specified by `path` argument (if provided)
    /// 4. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 5. Environment variables with `CONFIG_ENV_PREFIX` prefix
    /// 6. Deployment variables (`DYNAMODB_TABLE_NAME`, `SNS_TOPIC_ARN`,
    ///    `S3_BUCKET_NAME` / `ARCHIVE_BUCKET_NAME`)
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder();

        if let Ok(region) = std::env::var(REGION_ENV_VAR) {
            for key in ["store.region", "notifier.region", "archive.region"] {
                builder = builder.set_default(key, region.clone())?;
            }
        }

        builder = builder
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(CONFIG_ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        // Deployment variables
        builder = builder.set_override_option("store.table_name", env_non_empty(TABLE_NAME_ENV_VAR))?;

        if let Some(topic) = env_non_empty(TOPIC_ARN_ENV_VAR) {
            builder = builder
                .set_override("notifier.topic_arn", topic)?
                .set_override("notifier.type", "sns")?;
        }

        let bucket = env_non_empty(BUCKET_ENV_VAR).or_else(|| env_non_empty(ARCHIVE_BUCKET_ENV_VAR));
        if let Some(bucket) = bucket {
            builder = builder
                .set_override("archive.bucket", bucket)?
                .set_override("archive.type", "s3")?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.store_type == StoreType::Dynamo && self.store.table_name.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "store.table_name is required for the dynamo store (set {})",
                TABLE_NAME_ENV_VAR
            )));
        }
        if self.store.chunk_size == 0 || self.store.chunk_size > MAX_BATCH_WRITE_ITEMS {
            return Err(ConfigError::Invalid(format!(
                "store.chunk_size must be between 1 and {}, got {}",
                MAX_BATCH_WRITE_ITEMS, self.store.chunk_size
            )));
        }
        if self.notifier.notifier_type == NotifierType::Sns && self.notifier.topic_arn.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "notifier.topic_arn is required for the sns notifier".to_string(),
            ));
        }
        if self.archive.archive_type == ArchiveType::S3 && self.archive.bucket.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "archive.bucket is required for the s3 archive".to_string(),
            ));
        }
        if self.pipeline.background_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.background_concurrency must be at least 1".to_string(),
            ));
        }
        if self.pipeline.retention_days <= 0 {
            return Err(ConfigError::Invalid(
                "pipeline.retention_days must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Create config for testing: in-memory store, no-op notifier.
    pub fn for_test() -> Self {
        Self {
            store: StoreConfig {
                store_type: StoreType::Memory,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
