//! Retry executor for network-bound scraping steps
//!
//! Runs an async operation under a per-attempt timeout and retries failures
//! with capped exponential backoff. The executor holds no per-call state and
//! can be shared between jobs.

use crate::clock::Clock;
use crate::config::RetryConfig;
use crate::error::RetryableError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry executor with capped exponential backoff
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    clock: Arc<dyn Clock>,
}

impl RetryExecutor {
    /// Create a new RetryExecutor with the given configuration
    pub fn new(config: RetryConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    /// Execute an async operation with retry logic
    ///
    /// The operation runs at most `max_retries` times in total. An attempt that
    /// does not settle within `attempt_timeout_ms` counts as a failure and is
    /// converted into `E` via `From<Elapsed>`. A non-retryable error ends the
    /// loop at once.
    ///
    /// # Returns
    ///
    /// The first successful value, or the last observed error
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + From<tokio::time::error::Elapsed> + std::fmt::Display,
    {
        let max_attempts = self.config.max_retries.max(1);
        let timeout = self.config.attempt_timeout();
        let mut attempt = 0u32;

        loop {
            let err = match tokio::time::timeout(timeout, operation()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => err,
                Err(elapsed) => E::from(elapsed),
            };

            if !err.is_retryable() {
                debug!(attempt = attempt + 1, error = %err, "Non-retryable error");
                return Err(err);
            }

            if attempt + 1 >= max_attempts {
                warn!(
                    attempts = attempt + 1,
                    max_retries = self.config.max_retries,
                    error = %err,
                    "Max retries exhausted"
                );
                return Err(err);
            }

            let backoff = self.calculate_backoff(attempt);
            debug!(
                attempt = attempt + 1,
                max_retries = self.config.max_retries,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "Retrying after transient error"
            );

            self.clock.sleep(backoff).await;
            attempt += 1;
        }
    }

    /// Calculate backoff duration for a given 0-based attempt number
    ///
    /// `min(initial_backoff_ms * 2^attempt, max_backoff_ms)`
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let ms = self
            .config
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.config.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// Get the retry configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}
