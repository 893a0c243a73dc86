//! Job state derived by folding a journal
//!
//! [`JobState`] is never stored; it is rebuilt from the journal whenever it
//! is needed. Folding is deterministic: the same entries always produce the
//! same state, and once a terminal event has been folded later events are
//! ignored.

use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;
use uuid::Uuid;

use super::events::{JobEvent, JournalEntry};
use crate::config::JobSettings;
use crate::error::{ErrorKind, IngestError, IngestResult};
use crate::types::{
    ChunkDescriptor, FailureDetail, JobPhase, JobStatusReport, JobSummary, ProcessingResult,
    SourceRef,
};

#[derive(Debug, Clone, PartialEq)]
pub struct JobState {
    pub job_id: Uuid,
    pub source: SourceRef,
    pub settings: JobSettings,
    pub phase: JobPhase,
    /// Persisted chunks by index
    pub descriptors: BTreeMap<u64, ChunkDescriptor>,
    /// Set once ingestion completed
    pub chunk_count: Option<u64>,
    pub total_records: Option<u64>,
    /// Chunks with at least one dispatched invocation
    pub dispatched: BTreeSet<u64>,
    /// Failed attempts per chunk, with the last error
    pub failed_attempts: BTreeMap<u64, (u32, FailureDetail)>,
    /// Final outcome per chunk; the first recorded outcome wins
    pub outcomes: BTreeMap<u64, ProcessingResult>,
    /// Job-level failure (ingestion error)
    pub failure: Option<FailureDetail>,
    pub summary: Option<JobSummary>,
    next_sequence: u64,
}

impl JobState {
    /// Rebuild the state of a job from its journal
    pub fn replay(job_id: Uuid, entries: &[JournalEntry]) -> IngestResult<Self> {
        let Some((first, rest)) = entries.split_first() else {
            return Err(IngestError::NotFound {
                location: format!("journal of job {}", job_id),
            });
        };

        let JobEvent::JobCreated { source, settings } = &first.event else {
            return Err(IngestError::journal(format!(
                "journal of job {} starts with {} instead of job_created",
                job_id,
                first.event.name()
            )));
        };
        if first.sequence != 0 {
            return Err(IngestError::journal(format!(
                "journal of job {} starts at sequence {}",
                job_id, first.sequence
            )));
        }

        let mut state = Self {
            job_id,
            source: source.clone(),
            settings: settings.clone(),
            phase: JobPhase::Created,
            descriptors: BTreeMap::new(),
            chunk_count: None,
            total_records: None,
            dispatched: BTreeSet::new(),
            failed_attempts: BTreeMap::new(),
            outcomes: BTreeMap::new(),
            failure: None,
            summary: None,
            next_sequence: 1,
        };
        for entry in rest {
            state.apply(entry)?;
        }
        Ok(state)
    }

    /// Fold one more entry
    pub fn apply(&mut self, entry: &JournalEntry) -> IngestResult<()> {
        if entry.sequence != self.next_sequence {
            return Err(IngestError::journal(format!(
                "journal of job {} expected sequence {}, found {}",
                self.job_id, self.next_sequence, entry.sequence
            )));
        }
        self.next_sequence += 1;

        if self.phase.is_terminal() {
            warn!(
                job_id = %self.job_id,
                sequence = entry.sequence,
                event = entry.event.name(),
                "Ignoring event after terminal state"
            );
            return Ok(());
        }

        match &entry.event {
            JobEvent::JobCreated { .. } => {
                return Err(IngestError::journal(format!(
                    "job {} created twice (sequence {})",
                    self.job_id, entry.sequence
                )));
            },
            JobEvent::IngestStarted => self.phase = JobPhase::Ingesting,
            JobEvent::ChunkPersisted { descriptor } => {
                self.descriptors
                    .insert(descriptor.chunk_index, descriptor.clone());
            },
            JobEvent::IngestCompleted {
                chunk_count,
                total_records,
            } => {
                // Leftovers of an earlier, longer ingest attempt are not part of the job
                self.descriptors.retain(|index, _| index < chunk_count);
                self.chunk_count = Some(*chunk_count);
                self.total_records = Some(*total_records);
                self.phase = JobPhase::Processing;
            },
            JobEvent::IngestFailed { error } => self.failure = Some(error.clone()),
            JobEvent::InvocationDispatched { chunk_index } => {
                self.dispatched.insert(*chunk_index);
            },
            JobEvent::InvocationAttemptFailed {
                chunk_index,
                attempt,
                error,
            } => {
                let slot = self
                    .failed_attempts
                    .entry(*chunk_index)
                    .or_insert((0, error.clone()));
                if *attempt >= slot.0 {
                    *slot = (*attempt, error.clone());
                }
            },
            JobEvent::InvocationCompleted { result, .. } => {
                self.outcomes
                    .entry(result.chunk_index)
                    .or_insert_with(|| result.clone());
            },
            JobEvent::JobCompleted { summary } => {
                self.phase = JobPhase::Completed;
                self.summary = Some(summary.clone());
            },
            JobEvent::JobFailed { summary } => {
                self.phase = JobPhase::Failed;
                self.summary = Some(summary.clone());
            },
        }
        Ok(())
    }

    pub fn ingest_completed(&self) -> bool {
        self.chunk_count.is_some()
    }

    /// Chunks with no recorded final outcome, ascending
    pub fn pending_chunks(&self) -> Vec<ChunkDescriptor> {
        self.descriptors
            .values()
            .filter(|d| !self.outcomes.contains_key(&d.chunk_index))
            .cloned()
            .collect()
    }

    /// Attempts already spent on a chunk without success
    pub fn attempts_used(&self, chunk_index: u64) -> u32 {
        self.failed_attempts
            .get(&chunk_index)
            .map(|(attempts, _)| *attempts)
            .unwrap_or(0)
    }

    pub fn last_error(&self, chunk_index: u64) -> Option<&FailureDetail> {
        self.failed_attempts.get(&chunk_index).map(|(_, error)| error)
    }

    pub fn processed_count(&self) -> u64 {
        self.outcomes.values().filter(|r| r.is_processed()).count() as u64
    }

    /// Every chunk has an outcome and all of them are processed
    pub fn all_processed(&self) -> bool {
        self.ingest_completed()
            && self
                .descriptors
                .keys()
                .all(|index| self.outcomes.get(index).is_some_and(|r| r.is_processed()))
    }

    /// Summary of the job as it stands
    ///
    /// `interrupted` marks every chunk without an outcome as failed with that
    /// kind (cancellation, timeout) and adds a job-level entry.
    pub fn build_summary(&self, interrupted: Option<&FailureDetail>) -> JobSummary {
        let mut failures: Vec<FailureDetail> = Vec::new();
        if let Some(failure) = &self.failure {
            failures.push(failure.clone());
        }
        if let Some(interruption) = interrupted {
            failures.push(interruption.clone());
        }

        for descriptor in self.descriptors.values() {
            let index = descriptor.chunk_index;
            match self.outcomes.get(&index) {
                Some(result) if !result.is_processed() => {
                    failures.push(result.error.clone().unwrap_or_else(|| {
                        FailureDetail::new(
                            Some(index),
                            ErrorKind::ProcessorInvocation,
                            "chunk failed",
                        )
                    }));
                },
                None if self.ingest_completed() => {
                    if let Some(interruption) = interrupted {
                        failures.push(FailureDetail::new(
                            Some(index),
                            interruption.kind,
                            format!("chunk {} not processed: {}", index, interruption.message),
                        ));
                    }
                },
                _ => {},
            }
        }

        let status = if failures.is_empty() && self.all_processed() {
            JobPhase::Completed
        } else {
            JobPhase::Failed
        };

        JobSummary {
            job_id: self.job_id,
            status,
            chunk_count: self
                .chunk_count
                .unwrap_or(self.descriptors.len() as u64),
            total_records: self.total_records.unwrap_or_else(|| {
                self.descriptors
                    .values()
                    .map(|d| d.record_count as u64)
                    .sum()
            }),
            processed_count: self.processed_count(),
            failures,
        }
    }

    pub fn report(&self) -> JobStatusReport {
        JobStatusReport {
            job_id: self.job_id,
            source: self.source.clone(),
            phase: self.phase,
            chunk_count: self
                .chunk_count
                .unwrap_or(self.descriptors.len() as u64),
            processed_count: self.processed_count(),
            summary: self.summary.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;
    use chrono::Utc;

    fn journal(job: Uuid, events: Vec<JobEvent>) -> Vec<JournalEntry> {
        let mut all = vec![JobEvent::JobCreated {
            source: SourceRef::new("in", "doc.json"),
            settings: IngestConfig::default().job_settings(),
        }];
        all.extend(events);
        all.into_iter()
            .enumerate()
            .map(|(i, event)| JournalEntry {
                sequence: i as u64,
                recorded_at: Utc::now(),
                event,
            })
            .collect()
    }

    fn descriptor(job: Uuid, index: u64, records: usize) -> ChunkDescriptor {
        ChunkDescriptor {
            job_id: job,
            chunk_index: index,
            container: "chunks".into(),
            storage_location: format!("{}/chunk-{:06}.json", job, index),
            record_count: records,
            size_bytes: 10,
            checksum: "ab".into(),
        }
    }

    fn failure(index: u64) -> FailureDetail {
        FailureDetail::new(Some(index), ErrorKind::ProcessorInvocation, "boom")
    }

    #[test]
    fn test_fold_processing_job() {
        let job = Uuid::new_v4();
        let entries = journal(
            job,
            vec![
                JobEvent::IngestStarted,
                JobEvent::ChunkPersisted {
                    descriptor: descriptor(job, 0, 2),
                },
                JobEvent::ChunkPersisted {
                    descriptor: descriptor(job, 1, 1),
                },
                JobEvent::IngestCompleted {
                    chunk_count: 2,
                    total_records: 3,
                },
                JobEvent::InvocationDispatched { chunk_index: 1 },
                JobEvent::InvocationAttemptFailed {
                    chunk_index: 1,
                    attempt: 1,
                    error: failure(1),
                },
                JobEvent::InvocationDispatched { chunk_index: 0 },
                JobEvent::InvocationCompleted {
                    result: ProcessingResult::processed(0, None),
                    attempts: 1,
                },
            ],
        );

        let state = JobState::replay(job, &entries).unwrap();
        assert_eq!(state.phase, JobPhase::Processing);
        assert_eq!(state.pending_chunks().len(), 1);
        assert_eq!(state.pending_chunks()[0].chunk_index, 1);
        assert_eq!(state.attempts_used(1), 1);
        assert_eq!(state.attempts_used(0), 0);
        assert_eq!(state.processed_count(), 1);
        assert!(!state.all_processed());
    }

    #[test]
    fn test_ingest_completed_drops_stale_descriptors() {
        let job = Uuid::new_v4();
        let entries = journal(
            job,
            vec![
                JobEvent::IngestStarted,
                JobEvent::ChunkPersisted {
                    descriptor: descriptor(job, 0, 2),
                },
                JobEvent::ChunkPersisted {
                    descriptor: descriptor(job, 1, 2),
                },
                JobEvent::IngestStarted,
                JobEvent::IngestCompleted {
                    chunk_count: 1,
                    total_records: 2,
                },
            ],
        );
        let state = JobState::replay(job, &entries).unwrap();
        assert_eq!(state.descriptors.len(), 1);
    }

    #[test]
    fn test_first_outcome_wins_and_terminal_is_sticky() {
        let job = Uuid::new_v4();
        let summary = JobSummary {
            job_id: job,
            status: JobPhase::Completed,
            chunk_count: 1,
            total_records: 1,
            processed_count: 1,
            failures: vec![],
        };
        let entries = journal(
            job,
            vec![
                JobEvent::IngestStarted,
                JobEvent::ChunkPersisted {
                    descriptor: descriptor(job, 0, 1),
                },
                JobEvent::IngestCompleted {
                    chunk_count: 1,
                    total_records: 1,
                },
                JobEvent::InvocationCompleted {
                    result: ProcessingResult::processed(0, None),
                    attempts: 1,
                },
                JobEvent::InvocationCompleted {
                    result: ProcessingResult::failed(0, failure(0)),
                    attempts: 3,
                },
                JobEvent::JobCompleted {
                    summary: summary.clone(),
                },
                JobEvent::IngestStarted,
            ],
        );
        let state = JobState::replay(job, &entries).unwrap();
        assert!(state.outcomes[&0].is_processed());
        assert_eq!(state.phase, JobPhase::Completed);
        assert_eq!(state.summary, Some(summary));
    }

    #[test]
    fn test_summary_lists_failed_and_interrupted_chunks() {
        let job = Uuid::new_v4();
        let entries = journal(
            job,
            vec![
                JobEvent::IngestStarted,
                JobEvent::ChunkPersisted {
                    descriptor: descriptor(job, 0, 1),
                },
                JobEvent::ChunkPersisted {
                    descriptor: descriptor(job, 1, 1),
                },
                JobEvent::ChunkPersisted {
                    descriptor: descriptor(job, 2, 1),
                },
                JobEvent::IngestCompleted {
                    chunk_count: 3,
                    total_records: 3,
                },
                JobEvent::InvocationCompleted {
                    result: ProcessingResult::processed(0, None),
                    attempts: 1,
                },
                JobEvent::InvocationCompleted {
                    result: ProcessingResult::failed(1, failure(1)),
                    attempts: 3,
                },
            ],
        );
        let state = JobState::replay(job, &entries).unwrap();

        let summary = state.build_summary(None);
        assert_eq!(summary.status, JobPhase::Failed);
        assert_eq!(summary.failed_chunks(), vec![1]);

        let cancelled = FailureDetail::new(None, ErrorKind::Cancelled, "job cancelled");
        let summary = state.build_summary(Some(&cancelled));
        assert_eq!(summary.failed_chunks(), vec![1, 2]);
        assert_eq!(summary.processed_count, 1);
        assert_eq!(summary.total_records, 3);
    }

    #[test]
    fn test_replay_rejects_gaps_and_missing_creation() {
        let job = Uuid::new_v4();
        let mut entries = journal(job, vec![JobEvent::IngestStarted]);
        entries[1].sequence = 5;
        assert!(matches!(
            JobState::replay(job, &entries),
            Err(IngestError::Journal(_))
        ));

        let entries = journal(job, vec![JobEvent::IngestStarted]);
        assert!(matches!(
            JobState::replay(job, &entries[1..]),
            Err(IngestError::Journal(_))
        ));
        assert!(matches!(
            JobState::replay(job, &[]),
            Err(IngestError::NotFound { .. })
        ));
    }
}
