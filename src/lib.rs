//! iops-ingest - stream validation and batched persistence
//!
//! Consumes batches of operational events from a partitioned stream,
//! validates each record, persists the valid ones in chunked batch writes,
//! publishes a rejection notice for each invalid one and archives every raw
//! batch for replay.
//!
//! ```text
//! [Stream batch] -> decode -> validate -+-> transform -> BatchWriter -> [Record store]
//!                                       +-> RejectionNotifier ---------> [Notification channel]
//!       |
//!       +-----------------------------------> Archiver ------------------> [Blob store]
//! ```

pub mod archive;
pub mod background;
pub mod config;
pub mod event;
pub mod kinesis;
pub mod notify;
pub mod pipeline;
pub mod storage;
pub mod transform;
pub mod utils;
pub mod validation;

pub use pipeline::{init_processor, BatchOutcome, BatchProcessor, PipelineError};
