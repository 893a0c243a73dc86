//! Append-only per-job event journals

use async_trait::async_trait;
use chrono::Utc;
use serde_jsonlines::JsonLinesWriter;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::events::{JobEvent, JournalEntry};
use crate::error::{IngestError, IngestResult};

#[async_trait]
pub trait EventJournal: Send + Sync {
    /// Durably append an event; returns it with its sequence and timestamp
    async fn append(&self, job_id: Uuid, event: JobEvent) -> IngestResult<JournalEntry>;

    /// All entries of a job in append order; empty if the job is unknown
    async fn load(&self, job_id: Uuid) -> IngestResult<Vec<JournalEntry>>;
}

fn entry(sequence: u64, event: JobEvent) -> JournalEntry {
    JournalEntry {
        sequence,
        recorded_at: Utc::now(),
        event,
    }
}

/// Journal kept in process memory
#[derive(Debug, Default)]
pub struct MemoryJournal {
    jobs: Mutex<HashMap<Uuid, Vec<JournalEntry>>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry from `keep` onwards, as if the process died after
    /// writing the first `keep` entries
    pub async fn truncate(&self, job_id: Uuid, keep: usize) {
        if let Some(entries) = self.jobs.lock().await.get_mut(&job_id) {
            entries.truncate(keep);
        }
    }
}

#[async_trait]
impl EventJournal for MemoryJournal {
    async fn append(&self, job_id: Uuid, event: JobEvent) -> IngestResult<JournalEntry> {
        let mut jobs = self.jobs.lock().await;
        let entries = jobs.entry(job_id).or_default();
        let appended = entry(entries.len() as u64, event);
        entries.push(appended.clone());
        Ok(appended)
    }

    async fn load(&self, job_id: Uuid) -> IngestResult<Vec<JournalEntry>> {
        Ok(self
            .jobs
            .lock()
            .await
            .get(&job_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// One JSON Lines file per job: `<dir>/<job_id>.jsonl`
///
/// Every append is flushed and synced before it is acknowledged. A final line
/// torn by a crash is discarded on load. Sequence assignment and the write
/// happen together on the blocking pool, even if the caller stops waiting.
#[derive(Debug, Clone)]
pub struct JsonLinesJournal {
    dir: PathBuf,
    next_sequence: Arc<StdMutex<HashMap<Uuid, u64>>>,
}

impl JsonLinesJournal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            next_sequence: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    pub fn path_for(&self, job_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.jsonl", job_id))
    }

    fn write_line(path: &Path, entry: &JournalEntry) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        {
            let mut writer = JsonLinesWriter::new(&mut file);
            writer.write(entry)?;
            writer.flush()?;
        }
        file.sync_data()
    }

    /// Parse a journal file, truncating a torn final line
    fn read_entries(path: &Path, job_id: Uuid) -> IngestResult<Vec<JournalEntry>> {
        let content = match std::fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(IngestError::journal(format!("{}: {}", path.display(), e))),
        };

        let mut entries = Vec::new();
        let mut consumed = 0usize;
        for line in content.split_inclusive(|b| *b == b'\n') {
            let body = line.trim_ascii();
            if body.is_empty() {
                consumed += line.len();
                continue;
            }
            // Only the last line can lack its newline
            if !line.ends_with(b"\n") {
                warn!(
                    job_id = %job_id,
                    path = %path.display(),
                    bytes = line.len(),
                    "Discarding torn final journal line"
                );
                std::fs::OpenOptions::new()
                    .write(true)
                    .open(path)
                    .and_then(|file| file.set_len(consumed as u64))
                    .map_err(IngestError::journal)?;
                break;
            }
            match serde_json::from_slice::<JournalEntry>(body) {
                Ok(entry) => {
                    entries.push(entry);
                    consumed += line.len();
                },
                Err(e) => {
                    return Err(IngestError::journal(format!(
                        "{}: corrupt entry after sequence {}: {}",
                        path.display(),
                        entries.len(),
                        e
                    )));
                },
            }
        }
        Ok(entries)
    }

    fn lock_sequences(
        sequences: &StdMutex<HashMap<Uuid, u64>>,
    ) -> IngestResult<MutexGuard<'_, HashMap<Uuid, u64>>> {
        sequences
            .lock()
            .map_err(|_| IngestError::journal("journal sequence table poisoned"))
    }
}

#[async_trait]
impl EventJournal for JsonLinesJournal {
    async fn append(&self, job_id: Uuid, event: JobEvent) -> IngestResult<JournalEntry> {
        let path = self.path_for(job_id);
        let sequences = self.next_sequence.clone();

        let appended = tokio::task::spawn_blocking(move || {
            let mut sequences = Self::lock_sequences(&sequences)?;
            let sequence = match sequences.get(&job_id) {
                Some(next) => *next,
                None => Self::read_entries(&path, job_id)?.len() as u64,
            };

            let appended = entry(sequence, event);
            Self::write_line(&path, &appended).map_err(IngestError::journal)?;
            sequences.insert(job_id, sequence + 1);
            Ok::<_, IngestError>(appended)
        })
        .await
        .map_err(IngestError::journal)??;

        debug!(
            job_id = %job_id,
            sequence = appended.sequence,
            event = appended.event.name(),
            "Journal append"
        );
        Ok(appended)
    }

    async fn load(&self, job_id: Uuid) -> IngestResult<Vec<JournalEntry>> {
        let path = self.path_for(job_id);
        let sequences = self.next_sequence.clone();

        tokio::task::spawn_blocking(move || {
            let _guard = Self::lock_sequences(&sequences)?;
            Self::read_entries(&path, job_id)
        })
        .await
        .map_err(IngestError::journal)?
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_journal_sequences() {
        let journal = MemoryJournal::new();
        let job = Uuid::new_v4();
        journal.append(job, JobEvent::IngestStarted).await.unwrap();
        let second = journal
            .append(job, JobEvent::InvocationDispatched { chunk_index: 0 })
            .await
            .unwrap();
        assert_eq!(second.sequence, 1);

        journal.truncate(job, 1).await;
        assert_eq!(journal.load(job).await.unwrap().len(), 1);
        assert!(journal.load(Uuid::new_v4()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_jsonl_journal_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let job = Uuid::new_v4();
        {
            let journal = JsonLinesJournal::new(dir.path());
            journal.append(job, JobEvent::IngestStarted).await.unwrap();
            journal
                .append(job, JobEvent::InvocationDispatched { chunk_index: 4 })
                .await
                .unwrap();
        }

        let journal = JsonLinesJournal::new(dir.path());
        let entries = journal.load(job).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].event, JobEvent::InvocationDispatched { chunk_index: 4 });

        let third = journal.append(job, JobEvent::IngestStarted).await.unwrap();
        assert_eq!(third.sequence, 2);
    }

    #[tokio::test]
    async fn test_jsonl_journal_drops_torn_tail() {
        let dir = TempDir::new().unwrap();
        let job = Uuid::new_v4();
        let journal = JsonLinesJournal::new(dir.path());
        journal.append(job, JobEvent::IngestStarted).await.unwrap();

        let path = journal.path_for(job);
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"sequence":1,"recordedAt":"#).unwrap();
        drop(file);

        let reopened = JsonLinesJournal::new(dir.path());
        assert_eq!(reopened.load(job).await.unwrap().len(), 1);
        let next = reopened.append(job, JobEvent::IngestStarted).await.unwrap();
        assert_eq!(next.sequence, 1);
        assert_eq!(reopened.load(job).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_jsonl_journal_rejects_corrupt_middle() {
        let dir = TempDir::new().unwrap();
        let job = Uuid::new_v4();
        let journal = JsonLinesJournal::new(dir.path());
        std::fs::write(journal.path_for(job), "not json\n{}\n").unwrap();
        assert!(matches!(journal.load(job).await, Err(IngestError::Journal(_))));
    }
}
