//! Error taxonomy for ingestion and workflow execution

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for ingest operations
pub type IngestResult<T> = std::result::Result<T, IngestError>;

/// Errors raised while ingesting a source document or running a job
///
/// Every variant carries plain strings rather than source errors so the value
/// can be cloned into journal events and job summaries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    /// The source document is not well-formed JSON or lacks the target array
    #[error("Malformed source at byte {offset}: {message}")]
    MalformedSource { offset: u64, message: String },

    #[error("Failed to write {location}{}: {message}", chunk_suffix(.chunk_index))]
    StorageWrite {
        location: String,
        chunk_index: Option<u64>,
        message: String,
    },

    #[error("Failed to read {location}: {message}")]
    StorageRead { location: String, message: String },

    #[error("Not found: {location}")]
    NotFound { location: String },

    /// The chunk processor gave up on a chunk
    #[error("Processor failed on chunk {chunk_index}: {message}")]
    ProcessorInvocation { chunk_index: u64, message: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Journal error: {0}")]
    Journal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

fn chunk_suffix(chunk_index: &Option<u64>) -> String {
    chunk_index
        .map(|index| format!(" (chunk {})", index))
        .unwrap_or_default()
}

impl IngestError {
    pub fn malformed(offset: u64, message: impl Into<String>) -> Self {
        IngestError::MalformedSource {
            offset,
            message: message.into(),
        }
    }

    pub fn write(location: impl Into<String>, message: impl ToString) -> Self {
        IngestError::StorageWrite {
            location: location.into(),
            chunk_index: None,
            message: message.to_string(),
        }
    }

    pub fn read(location: impl Into<String>, message: impl ToString) -> Self {
        IngestError::StorageRead {
            location: location.into(),
            message: message.to_string(),
        }
    }

    pub fn journal(message: impl ToString) -> Self {
        IngestError::Journal(message.to_string())
    }

    /// Attach the chunk index to a storage write failure
    pub fn for_chunk(self, index: u64) -> Self {
        match self {
            IngestError::StorageWrite {
                location, message, ..
            } => IngestError::StorageWrite {
                location,
                chunk_index: Some(index),
                message,
            },
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::MalformedSource { .. } => ErrorKind::MalformedSource,
            IngestError::StorageWrite { .. } => ErrorKind::StorageWrite,
            IngestError::StorageRead { .. } => ErrorKind::StorageRead,
            IngestError::NotFound { .. } => ErrorKind::NotFound,
            IngestError::ProcessorInvocation { .. } => ErrorKind::ProcessorInvocation,
            IngestError::Timeout(_) => ErrorKind::Timeout,
            IngestError::Cancelled => ErrorKind::Cancelled,
            IngestError::Journal(_) => ErrorKind::Journal,
            IngestError::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether retrying the same storage operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IngestError::StorageWrite { .. } | IngestError::StorageRead { .. }
        )
    }

    /// Chunk index the error refers to, if any
    pub fn chunk_index(&self) -> Option<u64> {
        match self {
            IngestError::StorageWrite { chunk_index, .. } => *chunk_index,
            IngestError::ProcessorInvocation { chunk_index, .. } => Some(*chunk_index),
            _ => None,
        }
    }
}

/// Serializable error classification recorded in journals and summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedSource,
    StorageWrite,
    StorageRead,
    NotFound,
    ProcessorInvocation,
    Timeout,
    Cancelled,
    Journal,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorKind::MalformedSource => "malformed_source",
            ErrorKind::StorageWrite => "storage_write",
            ErrorKind::StorageRead => "storage_read",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ProcessorInvocation => "processor_invocation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Journal => "journal",
            ErrorKind::Config => "config",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a pluggable chunk processor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    /// Worth retrying: network blips, throttling, store hiccups
    #[error("transient failure: {0}")]
    Transient(String),

    /// Retrying cannot help, the chunk is failed immediately
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl ProcessorError {
    pub fn transient(message: impl ToString) -> Self {
        ProcessorError::Transient(message.to_string())
    }

    pub fn permanent(message: impl ToString) -> Self {
        ProcessorError::Permanent(message.to_string())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ProcessorError::Transient(_))
    }
}

impl From<IngestError> for ProcessorError {
    fn from(err: IngestError) -> Self {
        if err.is_transient() {
            ProcessorError::Transient(err.to_string())
        } else {
            ProcessorError::Permanent(err.to_string())
        }
    }
}
