//! Mapping accepted events to storage records.
//!
//! Pure: the caller supplies the arrival instant so the mapping is
//! reproducible.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::event::IncomingEvent;

/// Default retention window for stored records.
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// `entity_type` used when the producer supplies none.
pub const DEFAULT_ENTITY_TYPE: &str = "event";

/// Hex characters of the sequence digest used in derived identities.
const SEQUENCE_ID_HEX_LEN: usize = 16;

/// How an `entity_id` is derived when the producer omits it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStrategy {
    /// `{event_type}-{arrival_unix_millis}-{position}`. Redelivery mints a new id.
    #[default]
    ArrivalTime,
    /// `{event_type}-{sha256(sequence)}`. Redelivery overwrites the same item.
    SequenceToken,
}

/// Item written to the record store, keyed by `(entity_id, entity_type)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageRecord {
    pub entity_id: String,
    pub entity_type: String,
    pub timestamp: String,
    pub event_type: String,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Expiry as unix seconds.
    pub expires_at: i64,
}

impl StorageRecord {
    /// Store key.
    pub fn key(&self) -> (&str, &str) {
        (&self.entity_id, &self.entity_type)
    }
}

/// Maps validated events into [`StorageRecord`]s.
#[derive(Debug, Clone)]
pub struct EventTransformer {
    retention: Duration,
    identity: IdentityStrategy,
}

impl Default for EventTransformer {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION_DAYS, IdentityStrategy::default())
    }
}

impl EventTransformer {
    pub fn new(retention_days: i64, identity: IdentityStrategy) -> Self {
        Self {
            retention: Duration::days(retention_days),
            identity,
        }
    }

    /// Build the storage record for an accepted event.
    ///
    /// Must only be called with events that passed validation; the event type
    /// and payload are assumed present. `position` is the record's index in
    /// its batch; every record of a batch shares `arrival`.
    pub fn transform(
        &self,
        event: &IncomingEvent,
        sequence: &str,
        position: usize,
        arrival: DateTime<Utc>,
    ) -> StorageRecord {
        let event_type = event.event_type.clone().unwrap_or_default();

        let entity_id = match &event.entity_id {
            Some(id) => id.clone(),
            None => {
                let id = self.derive_entity_id(&event_type, sequence, position, arrival);
                debug!(
                    entity_id = %id,
                    strategy = ?self.identity,
                    "Synthesized entity_id for event without one"
                );
                id
            }
        };

        StorageRecord {
            entity_id,
            entity_type: event
                .entity_type
                .clone()
                .unwrap_or_else(|| DEFAULT_ENTITY_TYPE.to_string()),
            timestamp: record_timestamp(event, arrival),
            event_type,
            payload: event
                .payload
                .clone()
                .unwrap_or_else(|| Value::Object(Map::new())),
            metrics: event.metrics.clone(),
            metadata: event.metadata.clone(),
            expires_at: (arrival + self.retention).timestamp(),
        }
    }

    fn derive_entity_id(
        &self,
        event_type: &str,
        sequence: &str,
        position: usize,
        arrival: DateTime<Utc>,
    ) -> String {
        match self.identity {
            IdentityStrategy::ArrivalTime => {
                format!("{}-{}-{}", event_type, arrival.timestamp_millis(), position)
            }
            IdentityStrategy::SequenceToken => {
                let digest = hex::encode(Sha256::digest(sequence.as_bytes()));
                format!("{}-{}", event_type, &digest[..SEQUENCE_ID_HEX_LEN])
            }
        }
    }
}

/// Producer timestamp as given, or the arrival instant when absent.
fn record_timestamp(event: &IncomingEvent, arrival: DateTime<Utc>) -> String {
    match &event.timestamp {
        None => arrival.to_rfc3339_opts(SecondsFormat::Millis, true),
        Some(Value::String(s)) => s.clone(),
        Some(other) => event
            .parsed_timestamp()
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_else(|| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn arrival() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn event() -> IncomingEvent {
        IncomingEvent {
            event_type: Some("session_started".to_string()),
            payload: Some(json!({"student_id": "stu_1234"})),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_for_missing_fields() {
        let record = EventTransformer::default().transform(&event(), "seq-1", 0, arrival());

        assert_eq!(record.entity_id, format!("session_started-{}-0", arrival().timestamp_millis()));
        assert_eq!(record.entity_type, "event");
        assert_eq!(record.timestamp, "2024-03-01T12:00:00.000Z");
        assert_eq!(record.event_type, "session_started");
        assert_eq!(record.payload, json!({"student_id": "stu_1234"}));
        assert!(record.metrics.is_none());
        assert!(record.metadata.is_none());
    }

    #[test]
    fn test_expires_after_retention_window() {
        let record = EventTransformer::default().transform(&event(), "seq-1", 0, arrival());
        assert_eq!(record.expires_at - arrival().timestamp(), 30 * 24 * 60 * 60);

        let short = EventTransformer::new(1, IdentityStrategy::ArrivalTime);
        let record = short.transform(&event(), "seq-1", 0, arrival());
        assert_eq!(record.expires_at - arrival().timestamp(), 24 * 60 * 60);
    }

    #[test]
    fn test_supplied_fields_are_kept() {
        let event = IncomingEvent {
            entity_id: Some("stu_1234".to_string()),
            entity_type: Some("student".to_string()),
            timestamp: Some(json!("2024-02-29T08:30:00Z")),
            metrics: Some(json!({"iops": 5})),
            metadata: Some(json!({"source": "simulator"})),
            ..event()
        };
        let record = EventTransformer::default().transform(&event, "seq-1", 0, arrival());

        assert_eq!(record.key(), ("stu_1234", "student"));
        assert_eq!(record.timestamp, "2024-02-29T08:30:00Z");
        assert_eq!(record.metrics, Some(json!({"iops": 5})));
        assert_eq!(record.metadata, Some(json!({"source": "simulator"})));
    }

    #[test]
    fn test_numeric_timestamp_normalized() {
        let event = IncomingEvent {
            timestamp: Some(json!(arrival().timestamp_millis())),
            ..event()
        };
        let record = EventTransformer::default().transform(&event, "seq-1", 0, arrival());
        assert_eq!(record.timestamp, "2024-03-01T12:00:00.000Z");
    }

    #[test]
    fn test_sequence_identity_is_stable_across_arrivals() {
        let transformer = EventTransformer::new(30, IdentityStrategy::SequenceToken);
        let first = transformer.transform(&event(), "seq-42", 0, arrival());
        let redelivered =
            transformer.transform(&event(), "seq-42", 0, arrival() + Duration::minutes(5));
        let other = transformer.transform(&event(), "seq-43", 0, arrival());

        assert_eq!(first.entity_id, redelivered.entity_id);
        assert_ne!(first.entity_id, other.entity_id);
        assert!(first.entity_id.starts_with("session_started-"));
        assert_eq!(first.entity_id.len(), "session_started-".len() + 16);
    }

    #[test]
    fn test_arrival_identity_changes_on_redelivery() {
        let transformer = EventTransformer::default();
        let first = transformer.transform(&event(), "seq-42", 0, arrival());
        let redelivered =
            transformer.transform(&event(), "seq-42", 0, arrival() + Duration::milliseconds(1));
        assert_ne!(first.entity_id, redelivered.entity_id);
    }

    #[test]
    fn test_arrival_identity_unique_within_batch() {
        let transformer = EventTransformer::default();
        let ids: std::collections::HashSet<String> = (0..5)
            .map(|i| {
                transformer
                    .transform(&event(), &format!("seq-{}", i), i, arrival())
                    .entity_id
            })
            .collect();

        assert_eq!(ids.len(), 5);
        assert!(ids.contains(&format!("session_started-{}-4", arrival().timestamp_millis())));
    }

    #[test]
    fn test_identity_strategy_deserializes_snake_case() {
        let strategy: IdentityStrategy = serde_json::from_str("\"sequence_token\"").unwrap();
        assert_eq!(strategy, IdentityStrategy::SequenceToken);
    }

    #[test]
    fn test_record_serializes_without_empty_optionals() {
        let record = EventTransformer::default().transform(&event(), "seq-1", 0, arrival());
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("metrics").is_none());
        assert_eq!(value["entity_type"], "event");
    }
}
