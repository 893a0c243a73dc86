//! Pluggable per-chunk unit of work
//!
//! The orchestrator may call [`ChunkProcessor::process`] more than once for
//! the same chunk (retries, resumed jobs), so implementations must keep their
//! side effects idempotent, e.g. by writing to a location derived from the
//! descriptor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use crate::error::ProcessorError;
use crate::retry::RetryPolicy;
use crate::storage::{BlobStore, ChunkStore};
use crate::types::ChunkDescriptor;

/// Successful processing of one chunk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_location: Option<String>,
}

impl ProcessingOutcome {
    pub fn with_output(location: impl Into<String>) -> Self {
        Self {
            output_location: Some(location.into()),
        }
    }
}

#[async_trait]
pub trait ChunkProcessor: Send + Sync {
    async fn process(&self, descriptor: &ChunkDescriptor) -> Result<ProcessingOutcome, ProcessorError>;
}

/// Adapts an async closure into a [`ChunkProcessor`]
pub struct FnProcessor<F> {
    f: F,
}

impl<F, Fut> FnProcessor<F>
where
    F: Fn(ChunkDescriptor) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ProcessingOutcome, ProcessorError>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> ChunkProcessor for FnProcessor<F>
where
    F: Fn(ChunkDescriptor) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ProcessingOutcome, ProcessorError>> + Send,
{
    async fn process(&self, descriptor: &ChunkDescriptor) -> Result<ProcessingOutcome, ProcessorError> {
        (self.f)(descriptor.clone()).await
    }
}

/// Output document written by [`RecordCountProcessor`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordCountReport {
    pub chunk_index: u64,
    pub record_count: usize,
    pub checksum: String,
}

/// Reads each chunk back, counts its records, and writes a small report
///
/// The report lands in the container the chunk was written to.
#[derive(Clone)]
pub struct RecordCountProcessor {
    blobs: Arc<dyn BlobStore>,
    retry: RetryPolicy,
}

impl RecordCountProcessor {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            blobs,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl std::fmt::Debug for RecordCountProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCountProcessor")
            .field("backend", &self.blobs.backend())
            .field("retry", &self.retry)
            .finish()
    }
}

#[async_trait]
impl ChunkProcessor for RecordCountProcessor {
    async fn process(&self, descriptor: &ChunkDescriptor) -> Result<ProcessingOutcome, ProcessorError> {
        let store = ChunkStore::new(self.blobs.clone(), descriptor.container.clone())
            .with_retry(self.retry);
        let payload = store.read_chunk(descriptor).await?;

        if payload.recipes.len() != descriptor.record_count {
            return Err(ProcessorError::permanent(format!(
                "chunk {} holds {} records, descriptor says {}",
                descriptor.chunk_index,
                payload.recipes.len(),
                descriptor.record_count
            )));
        }

        let report = RecordCountReport {
            chunk_index: descriptor.chunk_index,
            record_count: payload.recipes.len(),
            checksum: descriptor.checksum.clone(),
        };
        let data = serde_json::to_vec(&report).map_err(ProcessorError::permanent)?;
        let location = store
            .put_output(descriptor.job_id, descriptor.chunk_index, data)
            .await?;

        debug!(
            chunk_index = descriptor.chunk_index,
            records = report.record_count,
            output = %location,
            "Chunk counted"
        );
        Ok(ProcessingOutcome::with_output(location))
    }
}
