//! Filesystem-based blob store.
//!
//! Writes each object under the base directory using its key as a relative
//! path, with a JSON sidecar holding the object's headers. The body is
//! hard-linked into place, so an existing key fails instead of being
//! replaced:
//! ```text
//! {base_path}/
//!   events/year=2024/month=03/day=01/hour=07/
//!     batch-1709276709000.json.gz
//!     batch-1709276709000.json.gz.metadata.json
//! ```

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use super::{ArchiveError, ArchiveObject, BlobStore, Result};

/// Suffix of the headers sidecar written next to each object.
pub const METADATA_SUFFIX: &str = ".metadata.json";

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Object headers persisted next to the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectHeaders {
    pub content_type: String,
    pub content_encoding: String,
    pub metadata: HashMap<String, String>,
}

/// Filesystem-based blob store.
pub struct FilesystemBlobStore {
    base_path: PathBuf,
}

impl FilesystemBlobStore {
    /// Create a new filesystem blob store.
    ///
    /// Creates the base directory if it doesn't exist.
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).await?;
        Ok(Self { base_path })
    }

    /// Path an object key is written to.
    pub fn path_for_key(&self, key: &str) -> PathBuf {
        self.base_path.join(key.trim_start_matches('/'))
    }

    /// Read back the headers sidecar for a key.
    pub async fn read_headers(&self, key: &str) -> Result<ObjectHeaders> {
        let raw = fs::read(sidecar_path(&self.path_for_key(key))).await?;
        serde_json::from_slice(&raw).map_err(|e| ArchiveError::StoreFailed(e.to_string()))
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(METADATA_SUFFIX);
    PathBuf::from(name)
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn put_object(&self, object: ArchiveObject) -> Result<()> {
        let path = self.path_for_key(&object.key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let headers = ObjectHeaders {
            content_type: object.content_type.to_string(),
            content_encoding: object.content_encoding.to_string(),
            metadata: object.metadata,
        };
        let headers = serde_json::to_vec_pretty(&headers)
            .map_err(|e| ArchiveError::StoreFailed(e.to_string()))?;

        // Write a private temp file, then link it in; linking never replaces
        let temp_path =
            path.with_extension(format!("tmp{}", TEMP_SEQ.fetch_add(1, Ordering::Relaxed)));
        fs::write(&temp_path, &object.body).await?;
        let linked = fs::hard_link(&temp_path, &path).await;
        fs::remove_file(&temp_path).await?;
        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(ArchiveError::AlreadyExists(object.key));
            }
            Err(e) => return Err(e.into()),
        }
        fs::write(sidecar_path(&path), headers).await?;

        debug!(path = %path.display(), size = object.body.len(), "Stored archive object");
        Ok(())
    }

    fn storage_type(&self) -> &'static str {
        "filesystem"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{Archiver, RECORD_COUNT_KEY};
    use chrono::{TimeZone, Utc};
    use flate2::read::GzDecoder;
    use std::io::Read;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn create_temp_store() -> (FilesystemBlobStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemBlobStore::new(temp_dir.path()).await.unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_put_object_writes_body_and_headers() {
        let (store, temp) = create_temp_store().await;
        let archiver = Archiver::new(Arc::new(FilesystemBlobStore::new(temp.path()).await.unwrap()));
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap();
        let object = archiver
            .build_object(&["one".to_string(), "two".to_string()], at)
            .unwrap();
        let key = object.key.clone();

        store.put_object(object).await.unwrap();

        let body = std::fs::read(store.path_for_key(&key)).unwrap();
        let mut text = String::new();
        GzDecoder::new(body.as_slice()).read_to_string(&mut text).unwrap();
        assert_eq!(text, "one\ntwo");

        let headers = store.read_headers(&key).await.unwrap();
        assert_eq!(headers.content_encoding, "gzip");
        assert_eq!(headers.metadata.get(RECORD_COUNT_KEY).map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn test_key_creates_partition_directories() {
        let (store, temp) = create_temp_store().await;
        let key = "events/year=2024/month=03/day=01/hour=07/batch-1.json.gz";

        store
            .put_object(ArchiveObject {
                key: key.to_string(),
                body: vec![1, 2, 3],
                content_type: "application/json",
                content_encoding: "gzip",
                metadata: HashMap::new(),
            })
            .await
            .unwrap();

        let dir = temp.path().join("events/year=2024/month=03/day=01/hour=07");
        assert!(dir.is_dir());
        let leftovers = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_existing_key_is_not_replaced() {
        let (store, _temp) = create_temp_store().await;
        let object = |body: Vec<u8>| ArchiveObject {
            key: "events/batch-1.json.gz".to_string(),
            body,
            content_type: "application/json",
            content_encoding: "gzip",
            metadata: HashMap::new(),
        };

        store.put_object(object(vec![1])).await.unwrap();
        let result = store.put_object(object(vec![2])).await;

        assert!(matches!(result, Err(ArchiveError::AlreadyExists(_))));
        assert_eq!(std::fs::read(store.path_for_key("events/batch-1.json.gz")).unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_storage_type() {
        let (store, _temp) = create_temp_store().await;
        assert_eq!(store.storage_type(), "filesystem");
    }
}
