//! Batch orchestration.
//!
//! One call to [`BatchProcessor::process_batch`] handles one stream batch:
//!
//! 1. Decode and validate every record, in order. A bad record never stops
//!    its siblings.
//! 2. Fan out: one rejection notice per rejected record and one archive
//!    object for the whole raw batch, both in the background.
//! 3. Write accepted records through the [`BatchWriter`]. This is the only
//!    awaited side effect and the only one that can fail the batch.
//! 4. Summarize as a [`BatchOutcome`].
//!
//! A failed write returns [`PipelineError::WriteFailed`], which the host maps
//! to whole-batch redelivery. Rejected records in a redelivered batch are
//! rejected (and notified) again.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::archive::{init_blob_store, ArchiveError, Archiver, BlobStore};
use crate::background::{BackgroundTasks, DrainReport};
use crate::config::{Config, ConfigError};
use crate::event::{decode_record, RawRecord};
use crate::notify::{init_notifier, Notifier, NotifyError, RejectionNotifier};
use crate::storage::{init_record_store, BatchWriter, RecordStore, StorageError};
use crate::transform::{EventTransformer, StorageRecord};
use crate::validation::{validate_event, ValidationResult};

/// Default cap on concurrent notify/archive tasks.
pub const DEFAULT_BACKGROUND_CONCURRENCY: usize = 16;

/// Per-batch summary for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub total: usize,
    pub accepted: usize,
    pub rejected: usize,
    /// Accepted records that carried warnings.
    pub warned: usize,
    pub write_failed: bool,
}

impl BatchOutcome {
    /// Percentage of records accepted. An empty batch counts as 100%.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.accepted as f64 / self.total as f64 * 100.0
    }
}

/// Errors that cross the orchestrator boundary.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Accepted records could not all be stored; redeliver the whole batch.
    #[error("Batch write failed ({} accepted of {} records): {source}", .outcome.accepted, .outcome.total)]
    WriteFailed {
        #[source]
        source: StorageError,
        outcome: BatchOutcome,
    },
}

impl PipelineError {
    pub fn outcome(&self) -> &BatchOutcome {
        match self {
            PipelineError::WriteFailed { outcome, .. } => outcome,
        }
    }
}

/// Errors while building a processor from configuration.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Record store: {0}")]
    Storage(#[from] StorageError),

    #[error("Notifier: {0}")]
    Notify(#[from] NotifyError),

    #[error("Archive: {0}")]
    Archive(#[from] ArchiveError),
}

/// A rejected record with the raw text kept for audit.
struct Rejection {
    result: ValidationResult,
    raw: String,
}

/// Validates, persists, notifies and archives stream batches.
///
/// Holds no per-batch state, so one processor can serve concurrent batches.
pub struct BatchProcessor {
    writer: BatchWriter,
    notifier: RejectionNotifier,
    archiver: Archiver,
    transformer: EventTransformer,
    background: BackgroundTasks,
}

impl BatchProcessor {
    /// Create a processor with default chunking, retention and concurrency.
    pub fn new(
        store: Arc<dyn RecordStore>,
        notifier: Arc<dyn Notifier>,
        blob_store: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            writer: BatchWriter::new(store),
            notifier: RejectionNotifier::new(notifier),
            archiver: Archiver::new(blob_store),
            transformer: EventTransformer::default(),
            background: BackgroundTasks::new(DEFAULT_BACKGROUND_CONCURRENCY),
        }
    }

    /// Use a smaller write chunk.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Result<Self, StorageError> {
        self.writer = self.writer.with_chunk_size(chunk_size)?;
        Ok(self)
    }

    pub fn with_transformer(mut self, transformer: EventTransformer) -> Self {
        self.transformer = transformer;
        self
    }

    /// Cap concurrent background notify/archive tasks.
    pub fn with_background_concurrency(mut self, max_concurrency: usize) -> Self {
        self.background = BackgroundTasks::new(max_concurrency);
        self
    }

    /// Set the archive key prefix.
    pub fn with_archive_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.archiver = self.archiver.with_prefix(prefix);
        self
    }

    /// Build a processor and its backends from configuration.
    pub async fn from_config(config: &Config) -> Result<Self, InitError> {
        config.validate()?;

        let store = init_record_store(&config.store).await?;
        let notifier = init_notifier(&config.notifier).await?;
        let blob_store = init_blob_store(&config.archive).await?;

        let processor = Self::new(store, notifier, blob_store)
            .with_chunk_size(config.store.chunk_size)?
            .with_transformer(EventTransformer::new(
                config.pipeline.retention_days,
                config.pipeline.identity,
            ))
            .with_background_concurrency(config.pipeline.background_concurrency)
            .with_archive_prefix(config.archive.prefix.clone());

        info!(
            chunk_size = config.store.chunk_size,
            identity = ?config.pipeline.identity,
            retention_days = config.pipeline.retention_days,
            "Batch processor initialized"
        );
        Ok(processor)
    }

    /// Process one batch, stamping it with the current time.
    pub async fn process_batch(
        &self,
        records: Vec<RawRecord>,
    ) -> Result<BatchOutcome, PipelineError> {
        self.process_batch_at(records, Utc::now()).await
    }

    /// Process one batch with an explicit arrival instant.
    ///
    /// The arrival instant feeds synthesized ids, missing timestamps, expiry
    /// and the archive key.
    #[tracing::instrument(name = "pipeline.process_batch", skip_all, fields(records = records.len()))]
    pub async fn process_batch_at(
        &self,
        records: Vec<RawRecord>,
        arrival: DateTime<Utc>,
    ) -> Result<BatchOutcome, PipelineError> {
        let mut outcome = BatchOutcome {
            total: records.len(),
            ..Default::default()
        };

        if records.is_empty() {
            info!("Empty batch, nothing to do");
            return Ok(outcome);
        }

        let mut raw_batch = Vec::with_capacity(records.len());
        let mut accepted: Vec<StorageRecord> = Vec::new();
        let mut rejected: Vec<Rejection> = Vec::new();

        for (position, record) in records.iter().enumerate() {
            let raw = record.as_text().into_owned();

            let result = match decode_record(record) {
                Ok(event) => validate_event(&event),
                Err(e) => {
                    debug!(sequence = %record.sequence, error = %e, "Record failed to decode");
                    ValidationResult::from_decode_error(&e)
                }
            };

            if result.is_valid {
                if result.warnings().next().is_some() {
                    outcome.warned += 1;
                    debug!(
                        sequence = %record.sequence,
                        warnings = result.warnings().count(),
                        "Accepted record with warnings"
                    );
                }
                accepted.push(
                    self.transformer
                        .transform(&result.event, &record.sequence, position, arrival),
                );
            } else {
                rejected.push(Rejection {
                    result,
                    raw: raw.clone(),
                });
            }

            raw_batch.push(raw);
        }

        outcome.accepted = accepted.len();
        outcome.rejected = rejected.len();

        // Side channels first so they fire even when the write fails.
        // Spawning waits for a free slot when the pool is saturated.
        for rejection in rejected {
            let notifier = self.notifier.clone();
            self.background
                .spawn("notify", async move {
                    notifier.notify(&rejection.result, &rejection.raw).await;
                })
                .await;
        }

        let archiver = self.archiver.clone();
        self.background
            .spawn("archive", async move {
                archiver.archive(raw_batch, arrival).await;
            })
            .await;

        if !accepted.is_empty() {
            if let Err(source) = self.writer.write_all(&accepted).await {
                outcome.write_failed = true;
                error!(
                    total = outcome.total,
                    accepted = outcome.accepted,
                    rejected = outcome.rejected,
                    error = %source,
                    "Batch write failed, batch must be redelivered"
                );
                return Err(PipelineError::WriteFailed { source, outcome });
            }
        }

        if outcome.rejected > 0 {
            warn!(
                total = outcome.total,
                accepted = outcome.accepted,
                rejected = outcome.rejected,
                success_rate = outcome.success_rate(),
                "Batch processed with rejections"
            );
        } else {
            info!(
                total = outcome.total,
                accepted = outcome.accepted,
                success_rate = outcome.success_rate(),
                "Batch processed"
            );
        }

        Ok(outcome)
    }

    /// Background tasks spawned and not yet reaped.
    pub fn in_flight(&self) -> usize {
        self.background.in_flight()
    }

    /// Wait for background notify/archive work, abandoning what is left at
    /// the deadline.
    pub async fn shutdown(&self, timeout: Duration) -> DrainReport {
        self.background.drain(timeout).await
    }
}

/// Build a processor from configuration.
pub async fn init_processor(config: &Config) -> Result<BatchProcessor, InitError> {
    BatchProcessor::from_config(config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MockBlobStore;
    use crate::notify::MockNotifier;
    use crate::storage::MockRecordStore;
    use chrono::TimeZone;

    struct Harness {
        store: Arc<MockRecordStore>,
        notifier: Arc<MockNotifier>,
        blobs: Arc<MockBlobStore>,
        processor: BatchProcessor,
    }

    fn harness() -> Harness {
        let store = Arc::new(MockRecordStore::new());
        let notifier = Arc::new(MockNotifier::new());
        let blobs = Arc::new(MockBlobStore::new());
        let processor = BatchProcessor::new(store.clone(), notifier.clone(), blobs.clone());
        Harness {
            store,
            notifier,
            blobs,
            processor,
        }
    }

    fn arrival() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn raw(json: &str, seq: usize) -> RawRecord {
        RawRecord::new(json.as_bytes().to_vec(), seq.to_string())
    }

    #[test]
    fn test_success_rate() {
        let outcome = BatchOutcome {
            total: 4,
            accepted: 3,
            rejected: 1,
            ..Default::default()
        };
        assert_eq!(outcome.success_rate(), 75.0);
        assert_eq!(BatchOutcome::default().success_rate(), 100.0);
    }

    #[tokio::test]
    async fn test_warnings_do_not_reject() {
        let h = harness();
        let records = vec![raw(
            r#"{"event_type":"session_started","payload":{},"timestamp":"yesterday"}"#,
            1,
        )];

        let outcome = h.processor.process_batch_at(records, arrival()).await.unwrap();
        h.processor.shutdown(Duration::from_secs(5)).await;

        assert_eq!(outcome.accepted, 1);
        assert_eq!(outcome.warned, 1);
        assert_eq!(h.notifier.published_count().await, 0);

        let stored = h
            .store
            .get(&format!("session_started-{}-0", arrival().timestamp_millis()), "event")
            .await
            .unwrap();
        assert_eq!(stored.timestamp, "yesterday");
    }

    #[tokio::test]
    async fn test_all_rejected_batch_succeeds() {
        let h = harness();
        let records = vec![raw("{", 1), raw(r#"{"event_type":"bogus","payload":{}}"#, 2)];

        let outcome = h.processor.process_batch_at(records, arrival()).await.unwrap();
        let report = h.processor.shutdown(Duration::from_secs(5)).await;

        assert_eq!(outcome.accepted, 0);
        assert_eq!(outcome.rejected, 2);
        assert_eq!(outcome.success_rate(), 0.0);
        assert_eq!(report.completed, 3);
        assert_eq!(h.store.put_calls().await, 0);
        assert_eq!(h.notifier.published_count().await, 2);
        assert_eq!(h.blobs.put_count().await, 1);
    }

    #[tokio::test]
    async fn test_write_failure_carries_outcome() {
        let h = harness();
        h.store.set_fail_on_put(true).await;
        let records = vec![raw(r#"{"event_type":"ib_call_logged","payload":{"a":1}}"#, 1)];

        let err = h
            .processor
            .process_batch_at(records, arrival())
            .await
            .unwrap_err();

        assert!(err.outcome().write_failed);
        assert_eq!(err.outcome().accepted, 1);
        assert!(matches!(
            err,
            PipelineError::WriteFailed {
                source: StorageError::Write(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_sequence_token_identity() {
        let h = harness();
        let processor = h.processor.with_transformer(EventTransformer::new(
            30,
            crate::transform::IdentityStrategy::SequenceToken,
        ));
        let event = r#"{"event_type":"session_completed","payload":{}}"#;

        processor
            .process_batch_at(vec![raw(event, 42)], arrival())
            .await
            .unwrap();
        processor
            .process_batch_at(vec![raw(event, 42)], arrival() + chrono::Duration::seconds(5))
            .await
            .unwrap();
        processor.shutdown(Duration::from_secs(5)).await;

        // Redelivery of the same sequence overwrites instead of duplicating
        assert_eq!(h.store.put_calls().await, 2);
        assert_eq!(h.store.stored_count().await, 1);
    }

    #[tokio::test]
    async fn test_from_config_memory_backends() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut config = Config::for_test();
        config.archive.base_path = temp.path().to_path_buf();
        config.store.chunk_size = 10;

        let processor = init_processor(&config).await.unwrap();
        let outcome = processor
            .process_batch(vec![raw(r#"{"event_type":"session_started","payload":{}}"#, 1)])
            .await
            .unwrap();
        processor.shutdown(Duration::from_secs(5)).await;

        assert_eq!(outcome.accepted, 1);
    }

    #[tokio::test]
    async fn test_from_config_rejects_invalid() {
        let mut config = Config::for_test();
        config.pipeline.background_concurrency = 0;
        assert!(matches!(
            init_processor(&config).await,
            Err(InitError::Config(_))
        ));
    }
}
