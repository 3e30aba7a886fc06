//! AWS SNS notifier.
//!
//! Publishes each rejection report to a single topic. Delivery retries are
//! left to the SDK's retry policy.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sns::Client as SnsClient;
use tracing::{debug, info};

use super::{Notifier, NotifyError, Result};

/// SNS-backed rejection channel.
pub struct SnsNotifier {
    client: SnsClient,
    topic_arn: String,
}

impl SnsNotifier {
    /// Create a new SNS notifier.
    pub async fn new(
        topic_arn: impl Into<String>,
        region: Option<&str>,
        endpoint_url: Option<&str>,
    ) -> Result<Self> {
        let mut aws_config_builder = aws_config::defaults(BehaviorVersion::latest());

        if let Some(region) = region {
            aws_config_builder =
                aws_config_builder.region(aws_config::Region::new(region.to_string()));
        }

        if let Some(endpoint) = endpoint_url {
            aws_config_builder = aws_config_builder.endpoint_url(endpoint);
        }

        let aws_config = aws_config_builder.load().await;
        let topic_arn = topic_arn.into();

        info!(
            region = ?region,
            endpoint = ?endpoint_url,
            topic_arn = %topic_arn,
            "Connected to AWS SNS"
        );

        Ok(Self::with_client(SnsClient::new(&aws_config), topic_arn))
    }

    /// Create with explicit client (for testing).
    pub fn with_client(client: SnsClient, topic_arn: impl Into<String>) -> Self {
        Self {
            client,
            topic_arn: topic_arn.into(),
        }
    }
}

#[async_trait]
impl Notifier for SnsNotifier {
    async fn publish(&self, subject: &str, body: &str) -> Result<()> {
        let output = self
            .client
            .publish()
            .topic_arn(&self.topic_arn)
            .subject(subject)
            .message(body)
            .send()
            .await
            .map_err(|e| NotifyError::PublishFailed(format!("SNS publish failed: {}", e)))?;

        debug!(
            topic_arn = %self.topic_arn,
            message_id = ?output.message_id(),
            "Published to SNS"
        );
        Ok(())
    }
}
