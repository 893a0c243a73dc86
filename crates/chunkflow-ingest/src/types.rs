//! Core types shared by the parser, the chunk store and the workflow

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorKind, IngestError};

/// One element of the source array
///
/// Field order follows the source document (`serde_json` is built with
/// `preserve_order`).
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Locator of a source document, as delivered by a trigger
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    #[serde(rename = "sourceContainerRef")]
    pub container: String,
    #[serde(rename = "sourceBlobRef")]
    pub blob: String,
}

impl SourceRef {
    pub fn new(container: impl Into<String>, blob: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            blob: blob.into(),
        }
    }
}

impl std::fmt::Display for SourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.container, self.blob)
    }
}

/// Durable reference to a persisted chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkDescriptor {
    pub job_id: Uuid,
    pub chunk_index: u64,
    /// Output container of the job that wrote the chunk
    pub container: String,
    /// Derived from `(job_id, chunk_index)` only
    pub storage_location: String,
    pub record_count: usize,
    pub size_bytes: u64,
    /// SHA-256 hex of the stored payload bytes
    pub checksum: String,
}

/// Wire format of a persisted chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkPayload {
    pub chunk_index: u64,
    pub recipes: Vec<Record>,
}

/// Borrowed form of [`ChunkPayload`] used when writing
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChunkPayloadRef<'a> {
    pub chunk_index: u64,
    pub recipes: &'a [Record],
}

/// Phase of a job's state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Created,
    Ingesting,
    Processing,
    Completed,
    Failed,
}

impl JobPhase {
    pub fn as_str(&self) -> &str {
        match self {
            JobPhase::Created => "created",
            JobPhase::Ingesting => "ingesting",
            JobPhase::Processing => "processing",
            JobPhase::Completed => "completed",
            JobPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Completed | JobPhase::Failed)
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recorded detail of a failure attached to a job or a chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u64>,
    pub kind: ErrorKind,
    pub message: String,
}

impl FailureDetail {
    pub fn new(chunk_index: Option<u64>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            chunk_index,
            kind,
            message: message.into(),
        }
    }
}

impl From<&IngestError> for FailureDetail {
    fn from(err: &IngestError) -> Self {
        Self {
            chunk_index: err.chunk_index(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Processed,
    Failed,
}

/// Final outcome of processing one chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub chunk_index: u64,
    pub status: ProcessingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureDetail>,
}

impl ProcessingResult {
    pub fn processed(chunk_index: u64, output_location: Option<String>) -> Self {
        Self {
            chunk_index,
            status: ProcessingStatus::Processed,
            output_location,
            error: None,
        }
    }

    pub fn failed(chunk_index: u64, error: FailureDetail) -> Self {
        Self {
            chunk_index,
            status: ProcessingStatus::Failed,
            output_location: None,
            error: Some(error),
        }
    }

    pub fn is_processed(&self) -> bool {
        self.status == ProcessingStatus::Processed
    }
}

/// Terminal summary of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: Uuid,
    pub status: JobPhase,
    pub chunk_count: u64,
    pub total_records: u64,
    pub processed_count: u64,
    pub failures: Vec<FailureDetail>,
}

impl JobSummary {
    /// Chunk indices listed in the failure set, ascending
    pub fn failed_chunks(&self) -> Vec<u64> {
        let mut chunks: Vec<u64> = self.failures.iter().filter_map(|f| f.chunk_index).collect();
        chunks.sort_unstable();
        chunks.dedup();
        chunks
    }
}

/// Answer to a job status query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusReport {
    pub job_id: Uuid,
    pub source: SourceRef,
    pub phase: JobPhase,
    pub chunk_count: u64,
    pub processed_count: u64,
    /// Present once the job is terminal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<JobSummary>,
}
