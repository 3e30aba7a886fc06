//! Operational events as they arrive from the stream.
//!
//! - `RawRecord`: opaque transport bytes plus the stream sequence token
//! - `IncomingEvent`: decoded application event
//! - `EventType`: the fixed set of event types eligible for persistence
//! - `FieldMap` / `Lookup`: typed access to the open `payload`/`metrics` maps
//!
//! Decoding lives in [`decode`].

mod decode;

pub use decode::{decode_record, DecodeError};

use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

/// Event types accepted for persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    SessionStarted,
    SessionCompleted,
    IbCallLogged,
    TutorAvailabilityUpdated,
    CustomerHealthUpdate,
    SupplyDemandUpdate,
}

impl EventType {
    /// All known event types, in the order they are listed to producers.
    pub const ALL: [EventType; 6] = [
        EventType::SessionStarted,
        EventType::SessionCompleted,
        EventType::IbCallLogged,
        EventType::TutorAvailabilityUpdated,
        EventType::CustomerHealthUpdate,
        EventType::SupplyDemandUpdate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SessionStarted => "session_started",
            EventType::SessionCompleted => "session_completed",
            EventType::IbCallLogged => "ib_call_logged",
            EventType::TutorAvailabilityUpdated => "tutor_availability_updated",
            EventType::CustomerHealthUpdate => "customer_health_update",
            EventType::SupplyDemandUpdate => "supply_demand_update",
        }
    }

    /// Look up a wire name. Matching is exact (case-sensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// Comma-separated list of every wire name.
    pub fn allowed_names() -> String {
        Self::ALL
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record as delivered by the stream runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Transport payload (UTF-8 JSON when well-formed).
    pub data: Vec<u8>,
    /// Sequence token assigned by the source stream.
    pub sequence: String,
}

impl RawRecord {
    pub fn new(data: impl Into<Vec<u8>>, sequence: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            sequence: sequence.into(),
        }
    }

    /// Payload as text for audit trails. Invalid UTF-8 is replaced, never rejected.
    pub fn as_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

/// Decoded application event.
///
/// Fields the validator inspects are kept loosely typed: a field may be
/// absent, or present with the wrong shape, and both cases must survive
/// decoding so they can be reported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncomingEvent {
    /// Event type name. Non-string JSON values are kept as their JSON text.
    pub event_type: Option<String>,
    pub timestamp: Option<Value>,
    pub payload: Option<Value>,
    pub entity_id: Option<String>,
    pub entity_type: Option<String>,
    pub metrics: Option<Value>,
    pub metadata: Option<Value>,
}

impl IncomingEvent {
    /// The event type, if it is one of the known set.
    pub fn known_event_type(&self) -> Option<EventType> {
        self.event_type.as_deref().and_then(EventType::from_name)
    }

    /// `payload` as a map, if present and map-shaped.
    pub fn payload_map(&self) -> Option<FieldMap<'_>> {
        self.payload.as_ref().and_then(FieldMap::from_value)
    }

    /// `metrics` as a map, if present and map-shaped.
    pub fn metrics_map(&self) -> Option<FieldMap<'_>> {
        self.metrics.as_ref().and_then(FieldMap::from_value)
    }

    /// Parsed `timestamp`, if present and a calendar timestamp.
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp.as_ref().and_then(parse_timestamp)
    }
}

/// Result of looking up one key in a [`FieldMap`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup<'a> {
    /// Key not present.
    Absent,
    /// Present and numeric.
    Number(f64),
    /// Present with any other JSON shape (including `null`).
    Other(&'a Value),
}

impl Lookup<'_> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Lookup::Absent)
    }
}

/// Read-only view over an open key-value map.
#[derive(Debug, Clone, Copy)]
pub struct FieldMap<'a>(&'a Map<String, Value>);

impl<'a> FieldMap<'a> {
    /// Wrap a JSON value, if it is an object.
    pub fn from_value(value: &'a Value) -> Option<Self> {
        value.as_object().map(FieldMap)
    }

    pub fn get(&self, key: &str) -> Lookup<'a> {
        match self.0.get(key) {
            None => Lookup::Absent,
            Some(value) => match value.as_f64() {
                Some(n) => Lookup::Number(n),
                None => Lookup::Other(value),
            },
        }
    }
}

/// Parse a JSON timestamp value.
///
/// Accepts RFC 3339 strings, naive ISO-8601 date-times (taken as UTC) and
/// numeric epoch milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| Utc.from_utc_datetime(&naive))
        }
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}
