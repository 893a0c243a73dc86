//! In-process blob store for tests and single-run jobs

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use tokio::sync::RwLock;

use super::{display_location, BlobReader, BlobStore};
use crate::error::{IngestError, IngestResult};

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    containers: RwLock<HashMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys stored in a container, sorted
    pub async fn keys(&self, container: &str) -> Vec<String> {
        self.containers
            .read()
            .await
            .get(container)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    async fn object(&self, container: &str, key: &str) -> IngestResult<Vec<u8>> {
        self.containers
            .read()
            .await
            .get(container)
            .and_then(|objects| objects.get(key))
            .cloned()
            .ok_or_else(|| IngestError::NotFound {
                location: display_location(container, key),
            })
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ensure_container(&self, container: &str) -> IngestResult<()> {
        self.containers
            .write()
            .await
            .entry(container.to_string())
            .or_default();
        Ok(())
    }

    async fn put(&self, container: &str, key: &str, data: Vec<u8>) -> IngestResult<()> {
        self.containers
            .write()
            .await
            .entry(container.to_string())
            .or_default()
            .insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, container: &str, key: &str) -> IngestResult<Vec<u8>> {
        self.object(container, key).await
    }

    async fn open_read(&self, container: &str, key: &str) -> IngestResult<BlobReader> {
        let data = self.object(container, key).await?;
        Ok(Box::pin(Cursor::new(data)))
    }
}
