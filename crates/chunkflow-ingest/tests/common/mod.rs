//! Shared helpers for integration tests

#![allow(dead_code)]

use chunkflow_ingest::{
    BlobStore, ChunkProcessor, ChunkStore, EventJournal, IngestConfig, MemoryBlobStore,
    MemoryJournal, Orchestrator, RecordCountProcessor, SourceRef,
};
use serde_json::{json, Value};
use std::sync::Arc;

pub const SOURCE_CONTAINER: &str = "sources";

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chunkflow_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn recipes(n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| {
            json!({
                "id": i,
                "name": format!("recipe {}", i),
                "ingredients": [{"item": "flour", "grams": i * 10}, {"item": "salt"}],
                "meta": {"vegan": i % 2 == 0, "rating": null}
            })
        })
        .collect()
}

pub fn document(n: usize) -> Vec<u8> {
    json!({"source": "test", "recipes": recipes(n)})
        .to_string()
        .into_bytes()
}

/// Fast retries, short timeouts
pub fn test_config(chunk_size: usize) -> IngestConfig {
    IngestConfig {
        chunk_size,
        max_attempts: 3,
        processing_concurrency_limit: 4,
        invocation_timeout_secs: 30,
        retry_delay_ms: 1,
        ..IngestConfig::default()
    }
}

/// In-memory blobs and journal plus an orchestrator over them
pub struct Harness {
    pub blobs: Arc<MemoryBlobStore>,
    pub journal: Arc<MemoryJournal>,
    pub orchestrator: Orchestrator,
}

impl Harness {
    pub fn new(config: IngestConfig, processor: Arc<dyn ChunkProcessor>) -> Self {
        let blobs = Arc::new(MemoryBlobStore::new());
        let journal = Arc::new(MemoryJournal::new());
        Self::with_parts(blobs, journal, config, processor)
    }

    /// Harness whose processor counts the records of each chunk
    pub fn counting(config: IngestConfig) -> Self {
        let blobs = Arc::new(MemoryBlobStore::new());
        let processor = Arc::new(RecordCountProcessor::new(blobs.clone()));
        Self::with_parts(blobs, Arc::new(MemoryJournal::new()), config, processor)
    }

    pub fn with_parts(
        blobs: Arc<MemoryBlobStore>,
        journal: Arc<MemoryJournal>,
        config: IngestConfig,
        processor: Arc<dyn ChunkProcessor>,
    ) -> Self {
        let orchestrator = Orchestrator::new(
            blobs.clone() as Arc<dyn BlobStore>,
            journal.clone() as Arc<dyn EventJournal>,
            processor,
            config,
        );
        Self {
            blobs,
            journal,
            orchestrator,
        }
    }

    /// Rebuild the orchestrator over the same blobs and journal, as after a restart
    pub fn restart(&self, config: IngestConfig, processor: Arc<dyn ChunkProcessor>) -> Self {
        Self::with_parts(self.blobs.clone(), self.journal.clone(), config, processor)
    }

    pub fn chunk_store(&self) -> ChunkStore {
        ChunkStore::new(
            self.blobs.clone(),
            self.orchestrator.config().output_container.clone(),
        )
    }

    pub async fn seed(&self, key: &str, bytes: Vec<u8>) -> SourceRef {
        seed(self.blobs.as_ref(), key, bytes).await
    }
}

pub async fn seed(blobs: &dyn BlobStore, key: &str, bytes: Vec<u8>) -> SourceRef {
    blobs
        .put(SOURCE_CONTAINER, key, bytes)
        .await
        .expect("seed source blob");
    SourceRef::new(SOURCE_CONTAINER, key)
}
