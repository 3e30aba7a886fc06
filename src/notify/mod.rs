//! Rejection notification.
//!
//! Every record that fails decoding or validation produces one
//! `RejectionReport`, published to a notification channel:
//!
//! - subject: `[{severity}] Malformed Event Detected: {event_type}`
//! - body: JSON `{timestamp, severity, event_type, errors[], summary, raw_event}`
//!
//! Publishing is best-effort. Failures are logged and swallowed by
//! `RejectionNotifier`; they never fail the batch and are not retried here.
//!
//! ## Backends
//!
//! - `SnsNotifier` (feature: sns) - AWS SNS topic
//! - `NoopNotifier` - logs the subject only
//! - `MockNotifier` - records messages for tests

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{NotifierConfig, NotifierType};
use crate::validation::{Severity, ValidationIssue, ValidationResult};

pub mod mock;
#[cfg(feature = "sns")]
pub mod sns;

pub use mock::MockNotifier;
#[cfg(feature = "sns")]
pub use sns::SnsNotifier;

/// SNS rejects subjects longer than this.
pub const MAX_SUBJECT_LENGTH: usize = 100;

/// Event type reported when the record carried none.
pub const UNKNOWN_EVENT_TYPE: &str = "unknown";

/// Errors that can occur while publishing a notification.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to publish notification: {0}")]
    PublishFailed(String),

    #[error("Notifier backend '{0}' is not available in this build")]
    BackendUnavailable(&'static str),
}

/// Result type for notifier operations.
pub type Result<T> = std::result::Result<T, NotifyError>;

/// Transport for rejection messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Publish one message.
    async fn publish(&self, subject: &str, body: &str) -> Result<()>;

    /// Check if the notifier delivers anywhere.
    fn is_configured(&self) -> bool {
        true
    }
}

/// Structured report for one rejected record.
#[derive(Debug, Clone, Serialize)]
pub struct RejectionReport {
    pub timestamp: String,
    pub severity: Severity,
    pub event_type: String,
    #[serde(rename = "errors")]
    pub issues: Vec<ValidationIssue>,
    pub summary: String,
    pub raw_event: String,
}

impl RejectionReport {
    /// Build a report from a failed validation.
    ///
    /// Overall severity is the highest issue severity.
    pub fn from_result(result: &ValidationResult, raw_event: &str, at: DateTime<Utc>) -> Self {
        let severity = result.max_severity().unwrap_or(Severity::Error);
        let event_type = result
            .event
            .event_type
            .clone()
            .unwrap_or_else(|| UNKNOWN_EVENT_TYPE.to_string());

        Self {
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            severity,
            event_type,
            issues: result.issues.clone(),
            summary: summarize(&result.issues),
            raw_event: raw_event.to_string(),
        }
    }

    /// Message subject, limited to printable ASCII and the channel's length.
    ///
    /// Any other character, line breaks included, becomes `?`.
    pub fn subject(&self) -> String {
        format!(
            "[{}] Malformed Event Detected: {}",
            self.severity, self.event_type
        )
        .chars()
        .map(|c| if (' '..='~').contains(&c) { c } else { '?' })
        .take(MAX_SUBJECT_LENGTH)
        .collect()
    }

    /// JSON message body.
    pub fn body(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn summarize(issues: &[ValidationIssue]) -> String {
    let count = |s: Severity| issues.iter().filter(|i| i.severity == s).count();
    let details = issues
        .iter()
        .map(|i| format!("{}: {}", i.field, i.message))
        .collect::<Vec<_>>()
        .join("; ");

    format!(
        "Event rejected with {} critical, {} error and {} warning issue(s): {}",
        count(Severity::Critical),
        count(Severity::Error),
        count(Severity::Warning),
        details
    )
}

/// Builds and publishes rejection reports.
#[derive(Clone)]
pub struct RejectionNotifier {
    notifier: Arc<dyn Notifier>,
}

impl RejectionNotifier {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Publish the report for one rejected record.
    ///
    /// Never fails: publish errors are logged and dropped.
    pub async fn notify(&self, result: &ValidationResult, raw_event: &str) {
        let report = RejectionReport::from_result(result, raw_event, Utc::now());
        let subject = report.subject();

        let body = match report.body() {
            Ok(body) => body,
            Err(e) => {
                error!(event_type = %report.event_type, error = %e, "Failed to encode rejection report");
                return;
            }
        };

        match self.notifier.publish(&subject, &body).await {
            Ok(()) => debug!(
                severity = %report.severity,
                event_type = %report.event_type,
                issues = report.issues.len(),
                "Published rejection report"
            ),
            Err(e) => warn!(
                severity = %report.severity,
                event_type = %report.event_type,
                error = %e,
                "Failed to publish rejection report"
            ),
        }
    }
}

/// No-op notifier that logs but doesn't send anywhere.
///
/// Used when no notification channel is configured.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn publish(&self, subject: &str, _body: &str) -> Result<()> {
        warn!(subject = %subject, "Notifier not configured, dropping rejection report");
        Ok(())
    }

    fn is_configured(&self) -> bool {
        false
    }
}

/// Initialize the notifier based on configuration.
pub async fn init_notifier(config: &NotifierConfig) -> Result<Arc<dyn Notifier>> {
    match config.notifier_type {
        #[cfg(feature = "sns")]
        NotifierType::Sns => {
            info!(
                topic_arn = %config.topic_arn,
                region = ?config.region,
                endpoint = ?config.endpoint,
                "Notifier: sns"
            );
            let notifier = SnsNotifier::new(
                &config.topic_arn,
                config.region.as_deref(),
                config.endpoint.as_deref(),
            )
            .await?;
            Ok(Arc::new(notifier))
        }
        #[cfg(not(feature = "sns"))]
        NotifierType::Sns => {
            error!("SNS notifier requested but 'sns' feature is not enabled");
            Err(NotifyError::BackendUnavailable("sns"))
        }
        NotifierType::Noop => {
            info!("Notifier: noop");
            Ok(Arc::new(NoopNotifier))
        }
    }
}
