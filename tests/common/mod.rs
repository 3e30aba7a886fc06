//! Shared fixtures for pipeline integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

use iops_ingest::archive::MockBlobStore;
use iops_ingest::event::RawRecord;
use iops_ingest::notify::MockNotifier;
use iops_ingest::storage::MockRecordStore;
use iops_ingest::BatchProcessor;

/// Generous drain deadline for tests; mocks finish immediately.
pub const DRAIN: Duration = Duration::from_secs(5);

/// Processor wired to mock backends, with handles to inspect them.
pub struct TestPipeline {
    pub store: Arc<MockRecordStore>,
    pub notifier: Arc<MockNotifier>,
    pub blobs: Arc<MockBlobStore>,
    pub processor: BatchProcessor,
}

impl TestPipeline {
    pub fn new() -> Self {
        let store = Arc::new(MockRecordStore::new());
        let notifier = Arc::new(MockNotifier::new());
        let blobs = Arc::new(MockBlobStore::new());
        let processor = BatchProcessor::new(store.clone(), notifier.clone(), blobs.clone());
        Self {
            store,
            notifier,
            blobs,
            processor,
        }
    }
}

pub fn arrival() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap()
}

pub fn session_started(entity_id: &str) -> Value {
    json!({
        "event_type": "session_started",
        "timestamp": "2024-03-01T14:29:58Z",
        "entity_id": entity_id,
        "entity_type": "session",
        "payload": {
            "session_id": entity_id,
            "student_id": "stu_1001",
            "tutor_id": "tut_2002",
            "subject": "Algebra"
        },
        "metrics": {"iops": 42, "latency": 118.5, "errorRate": 0.4}
    })
}

pub fn raw(value: &Value, seq: usize) -> RawRecord {
    RawRecord::new(value.to_string().into_bytes(), format!("4959{:08}", seq))
}

pub fn raw_text(text: &str, seq: usize) -> RawRecord {
    RawRecord::new(text.as_bytes().to_vec(), format!("4959{:08}", seq))
}
