//! Durable job orchestrator
//!
//! Drives a job through ingestion (parse + chunk, sequential) and processing
//! (one processor invocation per chunk, bounded fan-out with `buffer_unordered`,
//! then a fan-in barrier). Every step is journaled before the next one starts;
//! a restarted job replays its journal and only executes what has no recorded
//! outcome.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::events::JobEvent;
use super::journal::EventJournal;
use super::state::JobState;
use crate::accumulator::accumulate;
use crate::config::IngestConfig;
use crate::error::{ErrorKind, IngestError, IngestResult, ProcessorError};
use crate::parser::RecordStream;
use crate::processor::ChunkProcessor;
use crate::retry::RetryPolicy;
use crate::storage::{BlobStore, ChunkStore};
use crate::types::{
    ChunkDescriptor, FailureDetail, JobPhase, JobStatusReport, JobSummary, ProcessingResult,
    SourceRef,
};

/// Chunk handed to the fan-out, with the retry budget already spent on it
struct Dispatch {
    descriptor: ChunkDescriptor,
    attempts_used: u32,
    last_error: Option<FailureDetail>,
}

pub struct Orchestrator {
    blobs: Arc<dyn BlobStore>,
    journal: Arc<dyn EventJournal>,
    processor: Arc<dyn ChunkProcessor>,
    config: IngestConfig,
}

impl Orchestrator {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        journal: Arc<dyn EventJournal>,
        processor: Arc<dyn ChunkProcessor>,
        config: IngestConfig,
    ) -> Self {
        Self {
            blobs,
            journal,
            processor,
            config,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    fn store_for(&self, state: &JobState) -> ChunkStore {
        ChunkStore::new(self.blobs.clone(), state.settings.output_container.clone())
            .with_retry(self.config.storage_retry())
    }

    async fn append(&self, job_id: Uuid, event: JobEvent) -> IngestResult<()> {
        self.journal.append(job_id, event).await.map(|_| ())
    }

    async fn load_state(&self, job_id: Uuid) -> IngestResult<JobState> {
        let entries = self.journal.load(job_id).await?;
        JobState::replay(job_id, &entries)
    }

    /// Record a new job for `source`; nothing runs yet
    #[instrument(skip(self), fields(source = %source))]
    pub async fn create_job(&self, source: &SourceRef) -> IngestResult<Uuid> {
        let job_id = Uuid::new_v4();
        self.append(
            job_id,
            JobEvent::JobCreated {
                source: source.clone(),
                settings: self.config.job_settings(),
            },
        )
        .await?;
        info!(job_id = %job_id, "Job created");
        Ok(job_id)
    }

    /// Create a job for `source` and run it to a terminal state
    pub async fn start(
        &self,
        source: &SourceRef,
        cancel: CancellationToken,
    ) -> IngestResult<JobSummary> {
        let job_id = self.create_job(source).await?;
        self.run(job_id, cancel).await
    }

    /// Continue a job from its journal with a fresh cancellation token
    pub async fn resume(&self, job_id: Uuid) -> IngestResult<JobSummary> {
        self.run(job_id, CancellationToken::new()).await
    }

    /// Current phase of a job and, once terminal, its summary
    pub async fn status(&self, job_id: Uuid) -> IngestResult<JobStatusReport> {
        Ok(self.load_state(job_id).await?.report())
    }

    /// Run a job to a terminal state
    ///
    /// A job that is already terminal returns its recorded summary without
    /// executing anything. Failed jobs are returned as `Ok` summaries; `Err`
    /// means the journal itself could not be read or written.
    #[instrument(skip(self, cancel), fields(job_id = %job_id))]
    pub async fn run(&self, job_id: Uuid, cancel: CancellationToken) -> IngestResult<JobSummary> {
        let state = self.load_state(job_id).await?;
        if let Some(summary) = state.summary.clone().filter(|_| state.phase.is_terminal()) {
            info!(status = %summary.status, "Job already terminal, returning recorded summary");
            return Ok(summary);
        }

        let start_time = Instant::now();
        info!(
            source = %state.source,
            phase = %state.phase,
            chunks = state.descriptors.len(),
            "Running job"
        );

        let interrupted = match self.config.job_timeout() {
            Some(limit) => match tokio::time::timeout(limit, self.drive(state, &cancel)).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!(timeout_secs = limit.as_secs(), "Job timed out");
                    Some(FailureDetail::new(
                        None,
                        ErrorKind::Timeout,
                        format!("job exceeded {:?}", limit),
                    ))
                },
            },
            None => self.drive(state, &cancel).await?,
        };

        // Finalization is not subject to the job deadline
        let state = self.load_state(job_id).await?;
        let summary = match state.summary.clone().filter(|_| state.phase.is_terminal()) {
            Some(summary) => {
                warn!(status = %summary.status, "Job already has a terminal event");
                summary
            },
            None => self.finalize(&state, interrupted.as_ref()).await?,
        };

        info!(
            status = %summary.status,
            chunks = summary.chunk_count,
            records = summary.total_records,
            processed = summary.processed_count,
            failures = summary.failures.len(),
            duration_secs = start_time.elapsed().as_secs_f64(),
            "Job finished"
        );
        Ok(summary)
    }

    /// Ingest and process; returns what interrupted the job, if anything
    async fn drive(
        &self,
        mut state: JobState,
        cancel: &CancellationToken,
    ) -> IngestResult<Option<FailureDetail>> {
        if !state.ingest_completed() {
            if let Err(e) = self.ingest(&state, cancel).await {
                return self.fail_ingest(state.job_id, e).await;
            }
            state = self.load_state(state.job_id).await?;
        }

        self.process(&state, cancel).await?;

        let state = self.load_state(state.job_id).await?;
        Ok((cancel.is_cancelled() && !state.pending_chunks().is_empty())
            .then(|| FailureDetail::from(&IngestError::Cancelled)))
    }

    /// Parse the source and persist every chunk
    ///
    /// Always restarts from the beginning of the source. Chunk writes are
    /// idempotent, and descriptors already journaled are not journaled again.
    async fn ingest(&self, state: &JobState, cancel: &CancellationToken) -> IngestResult<()> {
        let job_id = state.job_id;
        let settings = &state.settings;
        let store = self.store_for(state);

        self.append(job_id, JobEvent::IngestStarted).await?;
        info!(
            source = %state.source,
            target = %settings.target_path,
            chunk_size = settings.chunk_size,
            "Ingesting source"
        );

        let reader = store.open_source(&state.source).await?;
        let mut records = RecordStream::new(reader, settings.target_path.clone());

        let known = &state.descriptors;
        let descriptors = accumulate(
            &mut records,
            &store,
            job_id,
            settings.chunk_size,
            cancel,
            |descriptor| {
                let descriptor = descriptor.clone();
                let already_journaled = known.get(&descriptor.chunk_index) == Some(&descriptor);
                async move {
                    if already_journaled {
                        debug!(chunk_index = descriptor.chunk_index, "Chunk already journaled");
                        return Ok(());
                    }
                    self.append(job_id, JobEvent::ChunkPersisted { descriptor })
                        .await
                }
            },
        )
        .await?;

        self.append(
            job_id,
            JobEvent::IngestCompleted {
                chunk_count: descriptors.len() as u64,
                total_records: records.emitted(),
            },
        )
        .await?;
        info!(chunks = descriptors.len(), records = records.emitted(), "Ingest completed");
        Ok(())
    }

    async fn fail_ingest(
        &self,
        job_id: Uuid,
        err: IngestError,
    ) -> IngestResult<Option<FailureDetail>> {
        if matches!(err, IngestError::Journal(_)) {
            return Err(err);
        }

        let detail = FailureDetail::from(&err);
        if err == IngestError::Cancelled {
            warn!("Ingest cancelled");
            return Ok(Some(detail));
        }

        error!(kind = %detail.kind, error = %err, "Ingest failed");
        self.append(job_id, JobEvent::IngestFailed { error: detail })
            .await?;
        Ok(None)
    }

    /// Fan out one invocation per chunk without a recorded outcome and wait for all
    async fn process(&self, state: &JobState, cancel: &CancellationToken) -> IngestResult<()> {
        let pending: Vec<Dispatch> = state
            .pending_chunks()
            .into_iter()
            .map(|descriptor| Dispatch {
                attempts_used: state.attempts_used(descriptor.chunk_index),
                last_error: state.last_error(descriptor.chunk_index).cloned(),
                descriptor,
            })
            .collect();

        let concurrency = self.config.processing_concurrency_limit.max(1);
        info!(
            pending = pending.len(),
            done = state.outcomes.len(),
            concurrency,
            "Processing chunks"
        );

        let max_attempts = state.settings.max_attempts.max(1);
        let results: Vec<IngestResult<()>> = stream::iter(pending)
            .map(|dispatch| self.invoke(state.job_id, dispatch, max_attempts, cancel))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        results.into_iter().collect()
    }

    /// Run one chunk through the processor with retries and journal its outcome
    ///
    /// Returns without recording an outcome when the job is cancelled before
    /// the outcome is known.
    async fn invoke(
        &self,
        job_id: Uuid,
        dispatch: Dispatch,
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> IngestResult<()> {
        let Dispatch {
            descriptor,
            attempts_used,
            mut last_error,
        } = dispatch;
        let chunk_index = descriptor.chunk_index;

        if cancel.is_cancelled() {
            debug!(chunk_index, "Cancelled before dispatch");
            return Ok(());
        }

        if attempts_used >= max_attempts {
            let error = last_error.unwrap_or_else(|| {
                FailureDetail::new(
                    Some(chunk_index),
                    ErrorKind::ProcessorInvocation,
                    "retry budget exhausted",
                )
            });
            return self
                .append(
                    job_id,
                    JobEvent::InvocationCompleted {
                        result: ProcessingResult::failed(chunk_index, error),
                        attempts: attempts_used,
                    },
                )
                .await;
        }

        self.append(job_id, JobEvent::InvocationDispatched { chunk_index })
            .await?;

        let retry = RetryPolicy::new(max_attempts, self.config.retry_delay());
        let invocation_timeout = self.config.invocation_timeout();

        for attempt in (attempts_used + 1)..=max_attempts {
            debug!(chunk_index, attempt, max_attempts, "Invoking processor");

            let error = match tokio::time::timeout(
                invocation_timeout,
                self.processor.process(&descriptor),
            )
            .await
            {
                Ok(Ok(outcome)) => {
                    info!(chunk_index, attempt, "Chunk processed");
                    return self
                        .append(
                            job_id,
                            JobEvent::InvocationCompleted {
                                result: ProcessingResult::processed(
                                    chunk_index,
                                    outcome.output_location,
                                ),
                                attempts: attempt,
                            },
                        )
                        .await;
                },
                Ok(Err(ProcessorError::Permanent(message))) => {
                    let error = FailureDetail::new(
                        Some(chunk_index),
                        ErrorKind::ProcessorInvocation,
                        message,
                    );
                    error!(chunk_index, attempt, error = %error.message, "Chunk failed permanently");
                    return self
                        .append(
                            job_id,
                            JobEvent::InvocationCompleted {
                                result: ProcessingResult::failed(chunk_index, error),
                                attempts: attempt,
                            },
                        )
                        .await;
                },
                Ok(Err(ProcessorError::Transient(message))) => FailureDetail::new(
                    Some(chunk_index),
                    ErrorKind::ProcessorInvocation,
                    message,
                ),
                Err(_) => FailureDetail::new(
                    Some(chunk_index),
                    ErrorKind::Timeout,
                    format!("invocation exceeded {:?}", invocation_timeout),
                ),
            };

            warn!(
                chunk_index,
                attempt,
                max_attempts,
                error = %error.message,
                "Invocation attempt failed"
            );
            self.append(
                job_id,
                JobEvent::InvocationAttemptFailed {
                    chunk_index,
                    attempt,
                    error: error.clone(),
                },
            )
            .await?;
            last_error = Some(error);

            if attempt < max_attempts {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(chunk_index, "Cancelled while waiting to retry");
                        return Ok(());
                    },
                    _ = tokio::time::sleep(retry.delay_after(attempt)) => {},
                }
            }
        }

        let error = last_error.unwrap_or_else(|| {
            FailureDetail::new(
                Some(chunk_index),
                ErrorKind::ProcessorInvocation,
                "retry budget exhausted",
            )
        });
        error!(chunk_index, max_attempts, error = %error.message, "Chunk failed after all attempts");
        self.append(
            job_id,
            JobEvent::InvocationCompleted {
                result: ProcessingResult::failed(chunk_index, error),
                attempts: max_attempts,
            },
        )
        .await
    }

    /// Record the terminal event and write the summary manifest
    async fn finalize(
        &self,
        state: &JobState,
        interrupted: Option<&FailureDetail>,
    ) -> IngestResult<JobSummary> {
        let summary = state.build_summary(interrupted);
        let event = match summary.status {
            JobPhase::Completed => JobEvent::JobCompleted {
                summary: summary.clone(),
            },
            _ => JobEvent::JobFailed {
                summary: summary.clone(),
            },
        };
        self.append(state.job_id, event).await?;

        if let Err(e) = self.store_for(state).put_manifest(&summary).await {
            warn!(error = %e, "Failed to write job summary manifest");
        }
        Ok(summary)
    }
}
