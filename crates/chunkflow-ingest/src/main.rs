//! Chunkflow - chunked ingestion of large JSON documents

use anyhow::{Context, Result};
use chunkflow_common::logging::{init_logging, LogConfig, LogLevel};
use chunkflow_ingest::{
    open_blob_store, IngestConfig, JobPhase, JsonLinesJournal, Orchestrator,
    RecordCountProcessor, SourceRef, StorageConfig,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "chunkflow")]
#[command(author, version, about = "Split large JSON documents into chunks and process them durably")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Storage connection string: memory://, file:///dir, s3://KEY:SECRET@host:port/
    #[arg(long, global = true, env = "CHUNKFLOW_STORAGE")]
    storage: Option<String>,

    /// Directory holding job journals
    #[arg(long, global = true, env = "CHUNKFLOW_JOURNAL_DIR")]
    journal_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a job for a source document and run it
    Run {
        /// Container holding the source document
        #[arg(long)]
        container: String,

        /// Source document key
        #[arg(long)]
        blob: String,

        /// Records per chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Attempts per chunk
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Chunks processed at once
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Continue an interrupted job from its journal
    Resume {
        #[arg(long)]
        job: Uuid,
    },

    /// Show the phase and, once finished, the summary of a job
    Status {
        #[arg(long)]
        job: Uuid,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

/// Cancel the job on Ctrl-C; a second Ctrl-C is left to the default handler
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling job");
            token.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("chunkflow")
        .build()
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    let mut config = IngestConfig::from_env().context("Failed to load configuration")?;
    if let Some(dir) = cli.journal_dir {
        config.journal_dir = dir;
    }
    if let Command::Run {
        chunk_size,
        max_attempts,
        concurrency,
        ..
    } = &cli.command
    {
        config.chunk_size = chunk_size.unwrap_or(config.chunk_size);
        config.max_attempts = max_attempts.unwrap_or(config.max_attempts);
        config.processing_concurrency_limit =
            concurrency.unwrap_or(config.processing_concurrency_limit);
        config.validate()?;
    }

    let storage = match cli.storage {
        Some(raw) => raw.parse::<StorageConfig>()?,
        None => StorageConfig::from_env()?,
    };
    let blobs = open_blob_store(&storage)?;
    let processor = RecordCountProcessor::new(blobs.clone()).with_retry(config.storage_retry());
    let journal = Arc::new(JsonLinesJournal::new(config.journal_dir.clone()));
    let orchestrator = Orchestrator::new(
        blobs,
        journal,
        Arc::new(processor),
        config,
    );

    let summary = match cli.command {
        Command::Run {
            container, blob, ..
        } => {
            let source = SourceRef::new(container, blob);
            info!(source = %source, "Starting job");
            orchestrator.start(&source, cancel_on_ctrl_c()).await?
        },
        Command::Resume { job } => {
            info!(job_id = %job, "Resuming job");
            orchestrator.run(job, cancel_on_ctrl_c()).await?
        },
        Command::Status { job } => {
            let report = orchestrator.status(job).await?;
            return print_json(&report);
        },
    };

    print_json(&summary)?;
    if summary.status != JobPhase::Completed {
        anyhow::bail!(
            "Job {} failed: {} of {} chunks processed",
            summary.job_id,
            summary.processed_count,
            summary.chunk_count
        );
    }
    Ok(())
}
