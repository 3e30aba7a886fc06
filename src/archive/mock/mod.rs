//! Mock blob store for testing.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ArchiveError, ArchiveObject, BlobStore, Result};

/// Mock blob store that keeps written objects in memory.
///
/// Like the real backends, a key can be written once.
#[derive(Default)]
pub struct MockBlobStore {
    objects: RwLock<Vec<ArchiveObject>>,
    fail_on_put: RwLock<bool>,
    failed_attempts: RwLock<usize>,
}

impl MockBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_put(&self, fail: bool) {
        *self.fail_on_put.write().await = fail;
    }

    /// Objects successfully written, in write order.
    pub async fn objects(&self) -> Vec<ArchiveObject> {
        self.objects.read().await.clone()
    }

    pub async fn put_count(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn failed_attempts(&self) -> usize {
        *self.failed_attempts.read().await
    }

    /// Sum of `record-count` metadata across all objects.
    pub async fn archived_record_count(&self) -> usize {
        self.objects
            .read()
            .await
            .iter()
            .filter_map(ArchiveObject::record_count)
            .sum()
    }
}

#[async_trait]
impl BlobStore for MockBlobStore {
    async fn put_object(&self, object: ArchiveObject) -> Result<()> {
        if *self.fail_on_put.read().await {
            *self.failed_attempts.write().await += 1;
            return Err(ArchiveError::StoreFailed("Mock put failure".to_string()));
        }
        let mut objects = self.objects.write().await;
        if objects.iter().any(|existing| existing.key == object.key) {
            return Err(ArchiveError::AlreadyExists(object.key));
        }
        objects.push(object);
        Ok(())
    }

    fn storage_type(&self) -> &'static str {
        "mock"
    }
}
