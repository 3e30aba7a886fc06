//! iops-processor: process one stream batch
//!
//! Reads a stream event document (`{"Records": [...]}`) from a file or
//! stdin, runs it through the pipeline, waits for background notify/archive
//! work and prints the batch outcome as JSON.
//!
//! ## Usage
//! ```text
//! iops-processor [--config <path>] [<event.json> | -]
//! ```
//!
//! ## Configuration
//! - IOPS_CONFIG: YAML config file
//! - IOPS__<SECTION>__<KEY>: config overrides (e.g. IOPS__STORE__TYPE=memory)
//! - DYNAMODB_TABLE_NAME, SNS_TOPIC_ARN, S3_BUCKET_NAME, AWS_REGION
//! - IOPS_LOG / IOPS_LOG_FORMAT: log filter and format
//!
//! Exits non-zero when the store write fails, so the caller redelivers
//! the batch.

use std::io::Read;

use tracing::{error, info};

use iops_ingest::config::Config;
use iops_ingest::kinesis::parse_event;
use iops_ingest::{init_processor, PipelineError};

struct Args {
    config_path: Option<String>,
    input: Option<String>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        config_path: None,
        input: None,
    };
    let mut iter = std::env::args().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                args.config_path = Some(iter.next().ok_or("--config requires a path")?);
            }
            "-" => args.input = None,
            other if other.starts_with('-') => return Err(format!("Unknown option: {}", other)),
            other => args.input = Some(other.to_string()),
        }
    }
    Ok(args)
}

fn read_input(path: Option<&str>) -> std::io::Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    iops_ingest::utils::bootstrap::init_tracing();

    let args = parse_args()?;
    let config = Config::load(args.config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let processor = init_processor(&config).await?;

    let input = read_input(args.input.as_deref())?;
    let records = parse_event(&input)?;
    info!(records = records.len(), "Read stream batch");

    let result = processor.process_batch(records).await;

    let drain = processor.shutdown(config.pipeline.drain_timeout()).await;
    info!(
        completed = drain.completed,
        abandoned = drain.abandoned,
        "Background work finished"
    );

    match result {
        Ok(outcome) => {
            println!("{}", serde_json::to_string(&outcome)?);
            Ok(())
        }
        Err(e @ PipelineError::WriteFailed { .. }) => {
            println!("{}", serde_json::to_string(e.outcome())?);
            error!(error = %e, "Batch must be redelivered");
            std::process::exit(1);
        }
    }
}
