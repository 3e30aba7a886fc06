//! Inbound stream envelope.
//!
//! The stream runtime hands the processor one JSON document per batch:
//!
//! ```json
//! {"Records": [{"eventID": "...", "kinesis": {"data": "<base64>", "sequenceNumber": "...", "partitionKey": "..."}}]}
//! ```
//!
//! Every envelope record becomes exactly one [`RawRecord`]. A `data` field
//! that is not valid base64 is passed through as its literal text so the
//! decoder rejects it and the rejection channel sees it.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::event::RawRecord;

/// Errors that can occur while reading a stream envelope.
#[derive(Debug, Error)]
pub enum KinesisError {
    #[error("Invalid stream event envelope: {0}")]
    Envelope(#[from] serde_json::Error),
}

/// Result type for envelope parsing.
pub type Result<T> = std::result::Result<T, KinesisError>;

/// One batch as delivered by the stream runtime.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KinesisEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<KinesisEventRecord>,
}

/// Envelope for one stream record.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KinesisEventRecord {
    #[serde(rename = "eventID", default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub event_source: Option<String>,
    pub kinesis: KinesisData,
}

/// Stream payload and position.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KinesisData {
    /// Base64-encoded record payload.
    pub data: String,
    pub sequence_number: String,
    #[serde(default)]
    pub partition_key: Option<String>,
    #[serde(default)]
    pub approximate_arrival_timestamp: Option<f64>,
}

impl KinesisEventRecord {
    /// Decode the envelope into a raw record.
    pub fn into_raw_record(self) -> RawRecord {
        let KinesisData {
            data,
            sequence_number,
            ..
        } = self.kinesis;

        match STANDARD.decode(data.as_bytes()) {
            Ok(bytes) => RawRecord::new(bytes, sequence_number),
            Err(e) => {
                warn!(
                    sequence = %sequence_number,
                    error = %e,
                    "Record data is not base64, passing through as text"
                );
                RawRecord::new(data.into_bytes(), sequence_number)
            }
        }
    }
}

impl KinesisEvent {
    pub fn into_raw_records(self) -> Vec<RawRecord> {
        self.records
            .into_iter()
            .map(KinesisEventRecord::into_raw_record)
            .collect()
    }
}

/// Parse a stream event document into raw records, preserving order.
pub fn parse_event(json: &str) -> Result<Vec<RawRecord>> {
    let event: KinesisEvent = serde_json::from_str(json)?;
    Ok(event.into_raw_records())
}
