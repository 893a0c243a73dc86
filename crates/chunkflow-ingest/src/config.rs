//! Ingestion configuration
//!
//! Loaded from `CHUNKFLOW_*` environment variables (and a `.env` file when
//! present). Everything that changes what a job produces is captured in
//! [`JobSettings`] and journaled when the job is created, so a resumed job keeps
//! its original settings even if the environment changed in between.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::accumulator::DEFAULT_CHUNK_SIZE;
use crate::parser::JsonPath;
use crate::retry::RetryPolicy;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 8;
pub const DEFAULT_OUTPUT_CONTAINER: &str = "chunks";
pub const DEFAULT_TARGET_PATH: &str = "recipes";
pub const DEFAULT_INVOCATION_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
pub const DEFAULT_STORAGE_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_JOURNAL_DIR: &str = "./chunkflow-journal";

/// Settings fixed for the lifetime of one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSettings {
    pub chunk_size: usize,
    pub max_attempts: u32,
    pub target_path: JsonPath,
    pub output_container: String,
}

/// Main ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Records per chunk
    pub chunk_size: usize,
    /// Attempts per chunk invocation, first one included
    pub max_attempts: u32,
    /// Chunk invocations running at once
    pub processing_concurrency_limit: usize,
    /// Container receiving chunks, outputs and summaries
    pub output_container: String,
    /// Location of the record array inside source documents
    pub target_path: JsonPath,
    pub invocation_timeout_secs: u64,
    /// Whole-job deadline; none when unset
    pub job_timeout_secs: Option<u64>,
    /// Base delay of the linear retry backoff
    pub retry_delay_ms: u64,
    /// Attempts per blob store operation
    pub storage_max_attempts: u32,
    /// Directory holding one event journal per job
    pub journal_dir: PathBuf,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            processing_concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            output_container: DEFAULT_OUTPUT_CONTAINER.to_string(),
            target_path: JsonPath::keys([DEFAULT_TARGET_PATH]),
            invocation_timeout_secs: DEFAULT_INVOCATION_TIMEOUT_SECS,
            job_timeout_secs: None,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            storage_max_attempts: DEFAULT_STORAGE_MAX_ATTEMPTS,
            journal_dir: PathBuf::from(DEFAULT_JOURNAL_DIR),
        }
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Invalid value for {}: '{}'", name, raw)),
        Err(_) => Ok(None),
    }
}

impl IngestConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            chunk_size: env_parse("CHUNKFLOW_CHUNK_SIZE")?.unwrap_or(defaults.chunk_size),
            max_attempts: env_parse("CHUNKFLOW_MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts),
            processing_concurrency_limit: env_parse("CHUNKFLOW_CONCURRENCY")?
                .unwrap_or(defaults.processing_concurrency_limit),
            output_container: std::env::var("CHUNKFLOW_OUTPUT_CONTAINER")
                .unwrap_or(defaults.output_container),
            target_path: env_parse("CHUNKFLOW_TARGET_PATH")?.unwrap_or(defaults.target_path),
            invocation_timeout_secs: env_parse("CHUNKFLOW_INVOCATION_TIMEOUT_SECS")?
                .unwrap_or(defaults.invocation_timeout_secs),
            job_timeout_secs: env_parse("CHUNKFLOW_JOB_TIMEOUT_SECS")?,
            retry_delay_ms: env_parse("CHUNKFLOW_RETRY_DELAY_MS")?
                .unwrap_or(defaults.retry_delay_ms),
            storage_max_attempts: env_parse("CHUNKFLOW_STORAGE_MAX_ATTEMPTS")?
                .unwrap_or(defaults.storage_max_attempts),
            journal_dir: std::env::var("CHUNKFLOW_JOURNAL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.journal_dir),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            anyhow::bail!("CHUNKFLOW_CHUNK_SIZE must be greater than 0");
        }
        if self.max_attempts == 0 {
            anyhow::bail!("CHUNKFLOW_MAX_ATTEMPTS must be greater than 0");
        }
        if self.processing_concurrency_limit == 0 {
            anyhow::bail!("CHUNKFLOW_CONCURRENCY must be greater than 0");
        }
        if self.output_container.trim().is_empty() {
            anyhow::bail!("CHUNKFLOW_OUTPUT_CONTAINER cannot be empty");
        }
        if self.invocation_timeout_secs == 0 {
            anyhow::bail!("CHUNKFLOW_INVOCATION_TIMEOUT_SECS must be greater than 0");
        }
        if self.job_timeout_secs == Some(0) {
            anyhow::bail!("CHUNKFLOW_JOB_TIMEOUT_SECS must be greater than 0");
        }
        if self.storage_max_attempts == 0 {
            anyhow::bail!("CHUNKFLOW_STORAGE_MAX_ATTEMPTS must be greater than 0");
        }
        Ok(())
    }

    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.invocation_timeout_secs)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Backoff applied to chunk store operations
    pub fn storage_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.storage_max_attempts, self.retry_delay())
    }

    /// Snapshot journaled with a new job
    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            chunk_size: self.chunk_size,
            max_attempts: self.max_attempts,
            target_path: self.target_path.clone(),
            output_container: self.output_container.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = IngestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk_size, 2000);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.target_path.to_string(), "recipes");
        assert_eq!(config.job_timeout(), None);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = IngestConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = IngestConfig {
            processing_concurrency_limit: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = IngestConfig {
            job_timeout_secs: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_job_settings_snapshot() {
        let config = IngestConfig {
            chunk_size: 50,
            target_path: "data.items".parse().unwrap(),
            ..Default::default()
        };
        let settings = config.job_settings();
        assert_eq!(settings.chunk_size, 50);
        assert_eq!(
            serde_json::to_value(&settings).unwrap()["targetPath"],
            serde_json::json!(["data", "items"])
        );
    }
}
