//! Amazon S3 blob store.
//!
//! Objects land at `s3://{bucket}/{key}` with the archive's content type,
//! content encoding and user metadata attached. Puts carry `If-None-Match: *`
//! so an existing key is reported instead of overwritten.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::debug;

use super::{ArchiveError, ArchiveObject, BlobStore, Result};

/// Status S3 returns when a conditional put finds the key taken.
const PRECONDITION_FAILED: u16 = 412;
/// Status S3 returns when a conditional put races another on the same key.
const CONDITIONAL_CONFLICT: u16 = 409;

/// S3-based blob store.
pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    /// Create a new S3 blob store.
    ///
    /// Uses default credentials from the environment (AWS_ACCESS_KEY_ID,
    /// AWS_SECRET_ACCESS_KEY, or IAM role).
    pub async fn new(bucket: impl Into<String>, region: Option<&str>) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region.to_string()));
        }
        let config = loader.load().await;

        Ok(Self::with_client(Client::new(&config), bucket))
    }

    /// Create with custom endpoint (LocalStack, MinIO).
    pub async fn with_endpoint(
        bucket: impl Into<String>,
        endpoint: &str,
        region: Option<&str>,
    ) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region.to_string()));
        }
        let config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .endpoint_url(endpoint)
            .force_path_style(true)
            .build();

        Ok(Self::with_client(Client::from_conf(s3_config), bucket))
    }

    /// Create with explicit client (for testing).
    pub fn with_client(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put_object(&self, object: ArchiveObject) -> Result<()> {
        let size = object.body.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object.key)
            .body(ByteStream::from(object.body))
            .content_type(object.content_type)
            .content_encoding(object.content_encoding)
            .set_metadata(Some(object.metadata))
            .if_none_match("*")
            .send()
            .await
            .map_err(|e| {
                match e.raw_response().map(|response| response.status().as_u16()) {
                    Some(PRECONDITION_FAILED | CONDITIONAL_CONFLICT) => {
                        ArchiveError::AlreadyExists(object.key.clone())
                    }
                    _ => ArchiveError::StoreFailed(format!("S3 put_object failed: {}", e)),
                }
            })?;

        debug!(bucket = %self.bucket, key = %object.key, size = size, "Stored archive object in S3");
        Ok(())
    }

    fn storage_type(&self) -> &'static str {
        "s3"
    }
}
