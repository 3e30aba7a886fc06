//! Stream envelope to pipeline.
//!
//! Run with: cargo test --test kinesis_envelope

mod common;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::json;

use common::{arrival, session_started, TestPipeline, DRAIN};
use iops_ingest::kinesis::parse_event;

fn envelope(data: &[String]) -> String {
    let records: Vec<_> = data
        .iter()
        .enumerate()
        .map(|(i, d)| {
            json!({
                "eventID": format!("shardId-000000000000:{}", i),
                "eventSource": "aws:kinesis",
                "kinesis": {"data": d, "sequenceNumber": format!("{}", 1000 + i), "partitionKey": "p"}
            })
        })
        .collect();
    json!({"Records": records}).to_string()
}

#[tokio::test]
async fn test_envelope_records_flow_through_pipeline() {
    let t = TestPipeline::new();
    let json = envelope(&[
        STANDARD.encode(session_started("sess_a").to_string()),
        "!!! not base64 !!!".to_string(),
        STANDARD.encode(session_started("sess_b").to_string()),
    ]);

    let records = parse_event(&json).unwrap();
    let outcome = t.processor.process_batch_at(records, arrival()).await.unwrap();
    t.processor.shutdown(DRAIN).await;

    assert_eq!(outcome.total, 3);
    assert_eq!(outcome.accepted, 2);
    assert_eq!(outcome.rejected, 1);

    let messages = t.notifier.messages().await;
    let body: serde_json::Value = serde_json::from_str(&messages[0].body).unwrap();
    assert_eq!(body["raw_event"], "!!! not base64 !!!");
    assert_eq!(t.blobs.archived_record_count().await, 3);
}
