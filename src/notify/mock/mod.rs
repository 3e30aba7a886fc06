//! Mock notifier implementation for testing.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Notifier, NotifyError, Result};

/// One published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub subject: String,
    pub body: String,
}

/// Mock notifier that records published messages.
#[derive(Default)]
pub struct MockNotifier {
    published: RwLock<Vec<PublishedMessage>>,
    fail_on_publish: RwLock<bool>,
    failed_attempts: RwLock<usize>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    pub async fn failed_attempts(&self) -> usize {
        *self.failed_attempts.read().await
    }

    pub async fn messages(&self) -> Vec<PublishedMessage> {
        self.published.read().await.clone()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn publish(&self, subject: &str, body: &str) -> Result<()> {
        if *self.fail_on_publish.read().await {
            *self.failed_attempts.write().await += 1;
            return Err(NotifyError::PublishFailed(
                "Mock publish failure".to_string(),
            ));
        }
        self.published.write().await.push(PublishedMessage {
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}
