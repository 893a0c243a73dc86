//! Linear-backoff retry policy shared by the chunk store and the orchestrator

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::IngestResult;

/// Default maximum number of attempts for store operations
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay; the actual delay is this value multiplied by the attempt number
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempt budget is spent
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> IngestResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = IngestResult<T>>,
    {
        let mut attempt = 1;
        loop {
            debug!("{} attempt {}/{}", what, attempt, self.max_attempts);
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        "{} attempt {}/{} failed: {}. Retrying in {:?}...",
                        what, attempt, self.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }
}
