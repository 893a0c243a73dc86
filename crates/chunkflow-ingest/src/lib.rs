//! Chunkflow Ingest Library
//!
//! Splits very large JSON documents into bounded chunks and processes every
//! chunk through a durable, resumable fan-out/fan-in workflow.
//!
//! # Components
//!
//! - **parser**: constant-memory streaming decoder for the record array
//! - **accumulator**: groups records into chunks and persists them
//! - **storage**: blob store backends (memory, filesystem, S3) and the chunk store
//! - **workflow**: journaled orchestrator, state fold and event journals
//! - **processor**: pluggable per-chunk unit of work
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use chunkflow_ingest::{
//!     IngestConfig, MemoryBlobStore, MemoryJournal, Orchestrator,
//!     RecordCountProcessor, SourceRef,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let blobs = Arc::new(MemoryBlobStore::new());
//!     let orchestrator = Orchestrator::new(
//!         blobs.clone(),
//!         Arc::new(MemoryJournal::new()),
//!         Arc::new(RecordCountProcessor::new(blobs.clone())),
//!         config,
//!     );
//!
//!     let source = SourceRef::new("incoming", "recipes.json");
//!     let summary = orchestrator.start(&source, CancellationToken::new()).await?;
//!     println!("{} chunks, {} records", summary.chunk_count, summary.total_records);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod accumulator;
pub mod config;
pub mod error;
pub mod parser;
pub mod processor;
pub mod retry;
pub mod storage;
pub mod types;
pub mod workflow;

pub use accumulator::{accumulate, ChunkAccumulator};
pub use config::{IngestConfig, JobSettings};
pub use error::{ErrorKind, IngestError, IngestResult, ProcessorError};
pub use parser::{JsonPath, PathSegment, RecordStream};
pub use processor::{ChunkProcessor, FnProcessor, ProcessingOutcome, RecordCountProcessor};
pub use retry::RetryPolicy;
pub use storage::{
    open_blob_store, BlobStore, ChunkStore, FsBlobStore, MemoryBlobStore, S3BlobStore,
    StorageConfig,
};
pub use types::{
    ChunkDescriptor, ChunkPayload, FailureDetail, JobPhase, JobStatusReport, JobSummary,
    ProcessingResult, ProcessingStatus, Record, SourceRef,
};
pub use workflow::{EventJournal, JobEvent, JsonLinesJournal, MemoryJournal, Orchestrator};
