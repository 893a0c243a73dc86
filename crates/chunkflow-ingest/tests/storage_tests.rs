//! Durable storage integration tests
//!
//! Runs whole jobs against the filesystem blob store and the JSON Lines
//! journal, restarting the orchestrator between runs.
//!
//! The S3 test needs a reachable MinIO/S3 endpoint and is skipped unless
//! `CHUNKFLOW_TEST_S3` holds a connection string, e.g.
//! `s3://minioadmin:minioadmin@localhost:9000/?tls=false`.

mod common;

use anyhow::Result;
use chunkflow_ingest::{
    open_blob_store, BlobStore, ChunkStore, EventJournal, FsBlobStore, IngestConfig, JobEvent,
    JobPhase, JsonLinesJournal, Orchestrator, RecordCountProcessor, StorageConfig,
};
use common::{document, init_tracing, seed, test_config};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::info;

fn durable_orchestrator(
    blobs: Arc<dyn BlobStore>,
    journal_dir: &std::path::Path,
    config: IngestConfig,
) -> Orchestrator {
    Orchestrator::new(
        blobs.clone(),
        Arc::new(JsonLinesJournal::new(journal_dir)),
        Arc::new(RecordCountProcessor::new(blobs)),
        config,
    )
}

// ============================================================================
// Filesystem + JSON Lines journal
// ============================================================================

#[tokio::test]
async fn test_filesystem_job_survives_restart() -> Result<()> {
    init_tracing();
    let data = TempDir::new()?;
    let journal_dir = TempDir::new()?;
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(data.path()));
    let source = seed(blobs.as_ref(), "recipes.json", document(25)).await;

    let first = durable_orchestrator(blobs.clone(), journal_dir.path(), test_config(10))
        .start(&source, CancellationToken::new())
        .await?;
    info!(?first, "First run finished");

    assert_eq!(first.status, JobPhase::Completed);
    assert_eq!(first.chunk_count, 3);
    assert_eq!(first.total_records, 25);

    let job_dir = data.path().join("chunks").join(first.job_id.to_string());
    for index in 0..3 {
        assert!(job_dir.join(format!("chunk-{:06}.json", index)).is_file());
        assert!(job_dir
            .join("output")
            .join(format!("chunk-{:06}.json", index))
            .is_file());
    }
    assert!(job_dir.join("summary.json").is_file());

    // A fresh process sees the terminal job and does not touch it
    let restarted = durable_orchestrator(blobs, journal_dir.path(), test_config(10));
    let second = restarted.resume(first.job_id).await?;
    assert_eq!(second, first);

    let status = restarted.status(first.job_id).await?;
    assert_eq!(status.phase, JobPhase::Completed);
    Ok(())
}

#[tokio::test]
async fn test_journal_file_records_job_history() -> Result<()> {
    init_tracing();
    let data = TempDir::new()?;
    let journal_dir = TempDir::new()?;
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(data.path()));
    let source = seed(blobs.as_ref(), "recipes.json", document(4)).await;

    let summary = durable_orchestrator(blobs, journal_dir.path(), test_config(2))
        .start(&source, CancellationToken::new())
        .await?;

    let journal = JsonLinesJournal::new(journal_dir.path());
    assert!(journal.path_for(summary.job_id).is_file());

    let entries = journal.load(summary.job_id).await?;
    let sequences: Vec<u64> = entries.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, (0..entries.len() as u64).collect::<Vec<_>>());
    assert!(matches!(entries[0].event, JobEvent::JobCreated { .. }));
    assert!(matches!(
        entries.last().map(|e| &e.event),
        Some(JobEvent::JobCompleted { .. })
    ));

    // Every line is a standalone JSON document
    let raw = std::fs::read_to_string(journal.path_for(summary.job_id))?;
    for line in raw.lines() {
        let value: serde_json::Value = serde_json::from_str(line)?;
        assert!(value["event"].get("eventType").is_some(), "untagged line: {}", line);
    }
    Ok(())
}

#[tokio::test]
async fn test_filesystem_store_from_connection_string() -> Result<()> {
    init_tracing();
    let data = TempDir::new()?;
    let config: StorageConfig = format!("file://{}", data.path().display()).parse()?;
    assert_eq!(
        config,
        StorageConfig::FileSystem {
            root: data.path().to_path_buf()
        }
    );

    let blobs = open_blob_store(&config)?;
    assert_eq!(blobs.backend(), "filesystem");
    blobs.put("c", "a/b.json", b"{}".to_vec()).await?;
    assert_eq!(blobs.get("c", "a/b.json").await?, b"{}".to_vec());
    Ok(())
}

// ============================================================================
// S3 / MinIO
// ============================================================================

/// Blob store for the S3 test, if one is configured
fn s3_store() -> Option<Arc<dyn BlobStore>> {
    let raw = std::env::var("CHUNKFLOW_TEST_S3").ok()?;
    let config: StorageConfig = match raw.parse() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid CHUNKFLOW_TEST_S3: {}", e);
            return None;
        },
    };
    open_blob_store(&config).ok()
}

#[tokio::test]
async fn test_s3_job_round_trip() -> Result<()> {
    init_tracing();
    let Some(blobs) = s3_store() else {
        println!("Skipping test: CHUNKFLOW_TEST_S3 not set");
        return Ok(());
    };

    blobs.ensure_container("chunkflow-test-sources").await?;
    blobs
        .put("chunkflow-test-sources", "recipes.json", document(12))
        .await?;
    let source = chunkflow_ingest::SourceRef::new("chunkflow-test-sources", "recipes.json");

    let journal_dir = TempDir::new()?;
    let mut config = test_config(5);
    config.output_container = "chunkflow-test-chunks".to_string();

    let summary = durable_orchestrator(blobs.clone(), journal_dir.path(), config)
        .start(&source, CancellationToken::new())
        .await?;
    assert_eq!(summary.status, JobPhase::Completed);
    assert_eq!(summary.chunk_count, 3);

    let manifest = ChunkStore::manifest_location(summary.job_id);
    let manifest: serde_json::Value =
        serde_json::from_slice(&blobs.get("chunkflow-test-chunks", &manifest).await?)?;
    assert_eq!(manifest["status"], "completed");
    Ok(())
}
