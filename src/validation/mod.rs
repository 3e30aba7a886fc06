//! Event validation.
//!
//! Checks structural completeness and business-rule constraints on decoded
//! events. Every rule runs; issues are accumulated in a fixed order so the
//! same event always yields the same issue list.
//!
//! An event is accepted for persistence iff it has no `error` or `critical`
//! issue. Warnings are reported but never block.

use serde::Serialize;

use crate::event::{DecodeError, EventType, IncomingEvent, Lookup};

/// Field names used in issues.
pub mod fields {
    pub const RAW_DATA: &str = "raw_data";
    pub const EVENT_TYPE: &str = "event_type";
    pub const PAYLOAD: &str = "payload";
    pub const METRICS: &str = "metrics";
    pub const METRICS_IOPS: &str = "metrics.iops";
    pub const METRICS_LATENCY: &str = "metrics.latency";
    pub const METRICS_ERROR_RATE: &str = "metrics.errorRate";
    pub const TIMESTAMP: &str = "timestamp";
}

/// Error constants for validation failures.
pub mod errmsg {
    pub const EVENT_TYPE_MISSING: &str = "Missing required field: event_type";
    pub const EVENT_TYPE_INVALID: &str = "Invalid event_type";
    pub const PAYLOAD_INVALID: &str = "Missing or invalid required field: payload (must be an object)";
    pub const METRICS_NOT_OBJECT: &str = "metrics must be an object";
    pub const IOPS_INVALID: &str = "metrics.iops must be a non-negative number";
    pub const LATENCY_INVALID: &str = "metrics.latency must be a non-negative number";
    pub const ERROR_RATE_INVALID: &str = "metrics.errorRate must be a number between 0 and 100";
    pub const TIMESTAMP_INVALID: &str = "Invalid timestamp format";
    pub const DECODE_FAILED: &str = "Failed to parse event";
}

/// Upper bound for `metrics.errorRate` (a percentage).
pub const MAX_ERROR_RATE: f64 = 100.0;

/// Issue severity. Ordered: `Warning < Error < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }

    /// Whether an issue of this severity prevents persistence.
    pub fn is_blocking(&self) -> bool {
        !matches!(self, Severity::Warning)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One field-level finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
    pub severity: Severity,
}

impl ValidationIssue {
    pub fn new(field: &str, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
            severity,
        }
    }
}

/// Verdict for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub issues: Vec<ValidationIssue>,
    pub event: IncomingEvent,
}

impl ValidationResult {
    /// Build a result, deriving `is_valid` from the issues.
    pub fn from_issues(event: IncomingEvent, issues: Vec<ValidationIssue>) -> Self {
        let is_valid = !issues.iter().any(|i| i.severity.is_blocking());
        Self {
            is_valid,
            issues,
            event,
        }
    }

    /// Synthetic rejection for a record that could not be decoded.
    pub fn from_decode_error(error: &DecodeError) -> Self {
        Self::from_issues(
            IncomingEvent::default(),
            vec![ValidationIssue::new(
                fields::RAW_DATA,
                format!("{}: {}", errmsg::DECODE_FAILED, error),
                Severity::Critical,
            )],
        )
    }

    /// Highest severity among the issues, if any.
    pub fn max_severity(&self) -> Option<Severity> {
        self.issues.iter().map(|i| i.severity).max()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
    }
}

/// Validate a decoded event.
pub fn validate_event(event: &IncomingEvent) -> ValidationResult {
    let mut issues = Vec::new();

    check_event_type(event, &mut issues);
    check_payload(event, &mut issues);
    check_metrics(event, &mut issues);
    check_timestamp(event, &mut issues);

    ValidationResult::from_issues(event.clone(), issues)
}

fn check_event_type(event: &IncomingEvent, issues: &mut Vec<ValidationIssue>) {
    match event.event_type.as_deref() {
        None => issues.push(ValidationIssue::new(
            fields::EVENT_TYPE,
            errmsg::EVENT_TYPE_MISSING,
            Severity::Critical,
        )),
        Some(name) if EventType::from_name(name).is_none() => {
            issues.push(ValidationIssue::new(
                fields::EVENT_TYPE,
                format!(
                    "{}: {}. Must be one of: {}",
                    errmsg::EVENT_TYPE_INVALID,
                    name,
                    EventType::allowed_names()
                ),
                Severity::Error,
            ))
        }
        Some(_) => {}
    }
}

fn check_payload(event: &IncomingEvent, issues: &mut Vec<ValidationIssue>) {
    if event.payload_map().is_none() {
        issues.push(ValidationIssue::new(
            fields::PAYLOAD,
            errmsg::PAYLOAD_INVALID,
            Severity::Critical,
        ));
    }
}

fn check_metrics(event: &IncomingEvent, issues: &mut Vec<ValidationIssue>) {
    let Some(raw) = event.metrics.as_ref() else {
        return;
    };
    let Some(metrics) = event.metrics_map() else {
        issues.push(ValidationIssue::new(
            fields::METRICS,
            format!("{} (got {})", errmsg::METRICS_NOT_OBJECT, raw),
            Severity::Error,
        ));
        return;
    };

    let non_negative = |n: f64| n >= 0.0;
    let percentage = |n: f64| (0.0..=MAX_ERROR_RATE).contains(&n);

    let rules: [(&str, &str, &str, &dyn Fn(f64) -> bool); 3] = [
        ("iops", fields::METRICS_IOPS, errmsg::IOPS_INVALID, &non_negative),
        ("latency", fields::METRICS_LATENCY, errmsg::LATENCY_INVALID, &non_negative),
        ("errorRate", fields::METRICS_ERROR_RATE, errmsg::ERROR_RATE_INVALID, &percentage),
    ];

    for (key, field, message, in_range) in rules {
        let ok = match metrics.get(key) {
            Lookup::Absent => true,
            Lookup::Number(n) => in_range(n),
            Lookup::Other(_) => false,
        };
        if !ok {
            issues.push(ValidationIssue::new(field, message, Severity::Error));
        }
    }
}

fn check_timestamp(event: &IncomingEvent, issues: &mut Vec<ValidationIssue>) {
    if event.timestamp.is_some() && event.parsed_timestamp().is_none() {
        issues.push(ValidationIssue::new(
            fields::TIMESTAMP,
            errmsg::TIMESTAMP_INVALID,
            Severity::Warning,
        ));
    }
}
