//! Error types shared across the chunkflow crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, ChunkflowError>;

/// Errors raised by the shared utilities
#[derive(Error, Debug)]
pub enum ChunkflowError {
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}
