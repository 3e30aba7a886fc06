//! Record decoding: transport bytes to `IncomingEvent`.

use serde_json::{Map, Value};
use thiserror::Error;

use super::{IncomingEvent, RawRecord};

/// Reasons a raw record cannot be turned into an event.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("record is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Decode one raw record.
///
/// Pure: no logging, no side effects. Missing fields are not decode errors;
/// they surface later as validation issues.
pub fn decode_record(record: &RawRecord) -> Result<IncomingEvent, DecodeError> {
    let text = std::str::from_utf8(&record.data)?;
    let value: Value = serde_json::from_str(text)?;

    match value {
        Value::Object(fields) => Ok(from_fields(fields)),
        other => Err(DecodeError::NotAnObject(json_kind(&other))),
    }
}

fn from_fields(mut fields: Map<String, Value>) -> IncomingEvent {
    IncomingEvent {
        event_type: take_text(&mut fields, "event_type"),
        timestamp: take_present(&mut fields, "timestamp"),
        payload: take_present(&mut fields, "payload"),
        entity_id: take_text(&mut fields, "entity_id"),
        entity_type: take_text(&mut fields, "entity_type"),
        metrics: take_present(&mut fields, "metrics"),
        metadata: take_present(&mut fields, "metadata"),
    }
}

/// Null and missing are the same thing to producers.
fn take_present(fields: &mut Map<String, Value>, key: &str) -> Option<Value> {
    match fields.remove(key) {
        None | Some(Value::Null) => None,
        Some(value) => Some(value),
    }
}

/// Text field; empty strings count as missing, other JSON kept as its text.
fn take_text(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match take_present(fields, key)? {
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(text: &str) -> RawRecord {
        RawRecord::new(text.as_bytes().to_vec(), "49590338271490256608559692538361571095921575989136588898")
    }

    #[test]
    fn test_decode_full_event() {
        let event = decode_record(&record(
            r#"{
                "event_type": "session_started",
                "timestamp": "2024-03-01T12:00:00Z",
                "payload": {"student_id": "stu_1234", "tutor_id": "tut_321"},
                "entity_id": "sess_1",
                "entity_type": "session",
                "metrics": {"iops": 10},
                "metadata": {"source": "simulator"}
            }"#,
        ))
        .unwrap();

        assert_eq!(event.event_type.as_deref(), Some("session_started"));
        assert_eq!(event.entity_id.as_deref(), Some("sess_1"));
        assert_eq!(event.entity_type.as_deref(), Some("session"));
        assert_eq!(event.payload, Some(json!({"student_id": "stu_1234", "tutor_id": "tut_321"})));
        assert_eq!(event.metrics, Some(json!({"iops": 10})));
        assert_eq!(event.metadata, Some(json!({"source": "simulator"})));
    }

    #[test]
    fn test_decode_minimal_object() {
        let event = decode_record(&record("{}")).unwrap();
        assert_eq!(event, IncomingEvent::default());
    }

    #[test]
    fn test_decode_null_and_empty_treated_as_missing() {
        let event =
            decode_record(&record(r#"{"event_type": "", "payload": null, "entity_id": null}"#))
                .unwrap();
        assert!(event.event_type.is_none());
        assert!(event.payload.is_none());
        assert!(event.entity_id.is_none());
    }

    #[test]
    fn test_decode_non_string_event_type_kept_as_text() {
        let event = decode_record(&record(r#"{"event_type": 42, "entity_id": 7}"#)).unwrap();
        assert_eq!(event.event_type.as_deref(), Some("42"));
        assert_eq!(event.entity_id.as_deref(), Some("7"));
    }

    #[test]
    fn test_decode_invalid_json() {
        let err = decode_record(&record("{not json")).unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let err = decode_record(&RawRecord::new(vec![0xff, 0xfe], "1")).unwrap_err();
        assert!(matches!(err, DecodeError::Utf8(_)));
    }

    #[test]
    fn test_decode_rejects_non_object() {
        let err = decode_record(&record("[1, 2, 3]")).unwrap_err();
        assert!(matches!(err, DecodeError::NotAnObject("array")));
        assert!(err.to_string().contains("array"));
    }
}
