//! Journal event vocabulary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::JobSettings;
use crate::types::{ChunkDescriptor, FailureDetail, JobSummary, ProcessingResult, SourceRef};

/// Something that happened to a job
///
/// Serialized adjacently tagged: `{"eventType": "chunk_persisted", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "payload", rename_all = "snake_case")]
pub enum JobEvent {
    /// First event of every journal
    JobCreated {
        source: SourceRef,
        settings: JobSettings,
    },
    IngestStarted,
    ChunkPersisted {
        descriptor: ChunkDescriptor,
    },
    #[serde(rename_all = "camelCase")]
    IngestCompleted {
        chunk_count: u64,
        total_records: u64,
    },
    IngestFailed {
        error: FailureDetail,
    },
    #[serde(rename_all = "camelCase")]
    InvocationDispatched {
        chunk_index: u64,
    },
    /// One attempt failed; the chunk may still be retried
    #[serde(rename_all = "camelCase")]
    InvocationAttemptFailed {
        chunk_index: u64,
        attempt: u32,
        error: FailureDetail,
    },
    /// Final outcome of a chunk
    InvocationCompleted {
        result: ProcessingResult,
        attempts: u32,
    },
    JobCompleted {
        summary: JobSummary,
    },
    JobFailed {
        summary: JobSummary,
    },
}

impl JobEvent {
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::JobCreated { .. } => "job_created",
            JobEvent::IngestStarted => "ingest_started",
            JobEvent::ChunkPersisted { .. } => "chunk_persisted",
            JobEvent::IngestCompleted { .. } => "ingest_completed",
            JobEvent::IngestFailed { .. } => "ingest_failed",
            JobEvent::InvocationDispatched { .. } => "invocation_dispatched",
            JobEvent::InvocationAttemptFailed { .. } => "invocation_attempt_failed",
            JobEvent::InvocationCompleted { .. } => "invocation_completed",
            JobEvent::JobCompleted { .. } => "job_completed",
            JobEvent::JobFailed { .. } => "job_failed",
        }
    }
}

/// One line of a job journal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    /// Position in the journal, starting at 0 with no gaps
    pub sequence: u64,
    pub recorded_at: DateTime<Utc>,
    pub event: JobEvent,
}
