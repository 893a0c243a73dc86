//! Blob storage and the chunk store built on top of it
//!
//! [`BlobStore`] is the minimal key → bytes contract a backend must honor:
//! containers created on demand, whole-object writes, streaming reads.
//! [`ChunkStore`] layers the chunk layout, checksums and retries on top of any
//! backend and is the only storage handle the rest of the crate sees.

pub mod config;
pub mod fs;
pub mod memory;
pub mod s3;

pub use config::{S3Config, StorageConfig};
pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;
pub use s3::S3BlobStore;

use async_trait::async_trait;
use chunkflow_common::checksum::{sha256_hex, verify_sha256};
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncBufRead;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{IngestError, IngestResult};
use crate::retry::RetryPolicy;
use crate::types::{ChunkDescriptor, ChunkPayload, ChunkPayloadRef, JobSummary, Record, SourceRef};

/// Streaming reader over one stored object
pub type BlobReader = Pin<Box<dyn AsyncBufRead + Send>>;

/// Key → bytes object storage
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Short backend name for logs
    fn backend(&self) -> &'static str;

    /// Create the container if it does not exist yet
    async fn ensure_container(&self, container: &str) -> IngestResult<()>;

    /// Write an object, replacing any previous content
    async fn put(&self, container: &str, key: &str, data: Vec<u8>) -> IngestResult<()>;

    /// Read a whole object; `NotFound` if absent
    async fn get(&self, container: &str, key: &str) -> IngestResult<Vec<u8>>;

    /// Open an object for streaming reads; `NotFound` if absent
    async fn open_read(&self, container: &str, key: &str) -> IngestResult<BlobReader>;
}

/// Build the backend described by `config`
pub fn open_blob_store(config: &StorageConfig) -> IngestResult<Arc<dyn BlobStore>> {
    let store: Arc<dyn BlobStore> = match config {
        StorageConfig::Memory => Arc::new(MemoryBlobStore::new()),
        StorageConfig::FileSystem { root } => Arc::new(FsBlobStore::new(root.clone())),
        StorageConfig::S3(s3) => Arc::new(S3BlobStore::new(s3)),
    };
    info!(backend = store.backend(), "Blob store opened");
    Ok(store)
}

pub(crate) fn display_location(container: &str, key: &str) -> String {
    format!("{}/{}", container, key)
}

/// Chunk persistence for one output container
///
/// Cheap to clone; clones share the backend and the container-ready flag.
#[derive(Clone)]
pub struct ChunkStore {
    blobs: Arc<dyn BlobStore>,
    container: String,
    retry: RetryPolicy,
    container_ready: Arc<OnceCell<()>>,
}

impl ChunkStore {
    pub fn new(blobs: Arc<dyn BlobStore>, container: impl Into<String>) -> Self {
        Self {
            blobs,
            container: container.into(),
            retry: RetryPolicy::default(),
            container_ready: Arc::new(OnceCell::new()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Storage key of a chunk; depends only on its identity
    pub fn location(job_id: Uuid, chunk_index: u64) -> String {
        format!("{}/chunk-{:06}.json", job_id, chunk_index)
    }

    /// Storage key of the processor output for a chunk
    pub fn output_location(job_id: Uuid, chunk_index: u64) -> String {
        format!("{}/output/chunk-{:06}.json", job_id, chunk_index)
    }

    pub fn manifest_location(job_id: Uuid) -> String {
        format!("{}/summary.json", job_id)
    }

    async fn ensure_container(&self) -> IngestResult<()> {
        self.container_ready
            .get_or_try_init(|| async {
                self.retry
                    .run("ensure container", || self.blobs.ensure_container(&self.container))
                    .await
            })
            .await
            .map(|_| ())
    }

    async fn write(&self, key: &str, data: Vec<u8>) -> IngestResult<()> {
        self.ensure_container().await?;
        self.retry
            .run("put", || self.blobs.put(&self.container, key, data.clone()))
            .await
    }

    /// Persist one chunk
    ///
    /// Writing the same records under the same `(job_id, chunk_index)` again
    /// produces identical bytes and an identical descriptor.
    #[instrument(skip(self, records), fields(container = %self.container, records = records.len()))]
    pub async fn put(
        &self,
        job_id: Uuid,
        chunk_index: u64,
        records: &[Record],
    ) -> IngestResult<ChunkDescriptor> {
        let key = Self::location(job_id, chunk_index);
        let payload = serde_json::to_vec(&ChunkPayloadRef {
            chunk_index,
            recipes: records,
        })
        .map_err(|e| IngestError::write(display_location(&self.container, &key), e))?;

        let checksum = sha256_hex(&payload);
        let size_bytes = payload.len() as u64;

        self.write(&key, payload)
            .await
            .map_err(|e| e.for_chunk(chunk_index))?;

        debug!(chunk_index, size_bytes, key = %key, "Chunk written");

        Ok(ChunkDescriptor {
            job_id,
            chunk_index,
            container: self.container.clone(),
            storage_location: key,
            record_count: records.len(),
            size_bytes,
            checksum,
        })
    }

    /// Stored payload bytes of a chunk, verified against the descriptor checksum
    ///
    /// Reads from the container recorded on the descriptor.
    #[instrument(skip(self, descriptor), fields(chunk_index = descriptor.chunk_index))]
    pub async fn get(&self, descriptor: &ChunkDescriptor) -> IngestResult<Vec<u8>> {
        let container = &descriptor.container;
        let key = &descriptor.storage_location;
        let data = self
            .retry
            .run("get", || self.blobs.get(container, key))
            .await?;

        verify_sha256(&data, &descriptor.checksum)
            .map_err(|e| IngestError::read(display_location(container, key), e))?;

        Ok(data)
    }

    /// Decoded payload of a chunk
    pub async fn read_chunk(&self, descriptor: &ChunkDescriptor) -> IngestResult<ChunkPayload> {
        let data = self.get(descriptor).await?;
        serde_json::from_slice(&data).map_err(|e| {
            IngestError::read(
                display_location(&descriptor.container, &descriptor.storage_location),
                e,
            )
        })
    }

    /// Store processor output for a chunk; returns its location
    #[instrument(skip(self, data), fields(container = %self.container, bytes = data.len()))]
    pub async fn put_output(
        &self,
        job_id: Uuid,
        chunk_index: u64,
        data: Vec<u8>,
    ) -> IngestResult<String> {
        let key = Self::output_location(job_id, chunk_index);
        self.write(&key, data)
            .await
            .map_err(|e| e.for_chunk(chunk_index))?;
        Ok(key)
    }

    /// Store the terminal summary of a job next to its chunks
    pub async fn put_manifest(&self, summary: &JobSummary) -> IngestResult<String> {
        let key = Self::manifest_location(summary.job_id);
        let data = serde_json::to_vec_pretty(summary)
            .map_err(|e| IngestError::write(display_location(&self.container, &key), e))?;
        self.write(&key, data).await?;
        Ok(key)
    }

    /// Open a source document for streaming
    #[instrument(skip(self), fields(source = %source))]
    pub async fn open_source(&self, source: &SourceRef) -> IngestResult<BlobReader> {
        self.retry
            .run("open source", || self.blobs.open_read(&source.container, &source.blob))
            .await
    }
}

impl std::fmt::Debug for ChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStore")
            .field("backend", &self.blobs.backend())
            .field("container", &self.container)
            .field("retry", &self.retry)
            .finish()
    }
}
