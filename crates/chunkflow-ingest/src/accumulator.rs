//! Groups records into fixed-size chunks and persists each full chunk

use tokio::io::AsyncBufRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{IngestError, IngestResult};
use crate::parser::RecordStream;
use crate::storage::ChunkStore;
use crate::types::{ChunkDescriptor, Record};

/// Default number of records per chunk
pub const DEFAULT_CHUNK_SIZE: usize = 2000;

/// Buffers at most `chunk_size` records; every full buffer becomes one store write
pub struct ChunkAccumulator<'a> {
    store: &'a ChunkStore,
    job_id: Uuid,
    chunk_size: usize,
    buffer: Vec<Record>,
    next_index: u64,
    total_records: u64,
}

impl<'a> ChunkAccumulator<'a> {
    /// `chunk_size` of zero is treated as one
    pub fn new(store: &'a ChunkStore, job_id: Uuid, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            store,
            job_id,
            chunk_size,
            buffer: Vec::with_capacity(chunk_size),
            next_index: 0,
            total_records: 0,
        }
    }

    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    /// Add a record; returns the descriptor when this record completed a chunk
    pub async fn push(&mut self, record: Record) -> IngestResult<Option<ChunkDescriptor>> {
        self.buffer.push(record);
        self.total_records += 1;
        if self.buffer.len() >= self.chunk_size {
            return self.flush().await;
        }
        Ok(None)
    }

    /// Persist the buffered records, if any, as the next chunk
    pub async fn flush(&mut self) -> IngestResult<Option<ChunkDescriptor>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let index = self.next_index;
        let descriptor = self.store.put(self.job_id, index, &self.buffer).await?;
        debug!(
            job_id = %self.job_id,
            chunk_index = index,
            records = descriptor.record_count,
            "Chunk persisted"
        );

        self.buffer.clear();
        self.next_index += 1;
        Ok(Some(descriptor))
    }
}

/// Drain a record stream into chunks, reporting each descriptor as soon as it is written
///
/// `on_chunk` runs before the next record is pulled. Cancellation is checked
/// between records, so nothing past the last fully written chunk is reported.
/// Returns all descriptors in index order.
pub async fn accumulate<R, F, Fut>(
    records: &mut RecordStream<R>,
    store: &ChunkStore,
    job_id: Uuid,
    chunk_size: usize,
    cancel: &CancellationToken,
    mut on_chunk: F,
) -> IngestResult<Vec<ChunkDescriptor>>
where
    R: AsyncBufRead + Unpin,
    F: FnMut(&ChunkDescriptor) -> Fut,
    Fut: std::future::Future<Output = IngestResult<()>>,
{
    let mut accumulator = ChunkAccumulator::new(store, job_id, chunk_size);
    let mut descriptors = Vec::new();

    loop {
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        let Some(record) = records.next_record().await? else {
            break;
        };
        if let Some(descriptor) = accumulator.push(record).await? {
            on_chunk(&descriptor).await?;
            descriptors.push(descriptor);
        }
    }
    if let Some(descriptor) = accumulator.flush().await? {
        on_chunk(&descriptor).await?;
        descriptors.push(descriptor);
    }

    info!(
        job_id = %job_id,
        chunks = descriptors.len(),
        records = accumulator.total_records(),
        "Source split into chunks"
    );
    Ok(descriptors)
}
