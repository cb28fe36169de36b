//! Retry with exponential backoff for transient ledger write failures.

use std::time::Duration;

use tokenomics_core::IdempotencyKey;
use tokenomics_store::StoreError;

/// Default number of attempts, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default wait before the second attempt (doubles with each attempt).
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 100;

/// Default cap on the wait between attempts.
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 5000;

/// Backoff schedule for ledger writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first. At least one attempt is always made.
    pub max_attempts: u32,
    /// Wait before the second attempt.
    pub initial_backoff: Duration,
    /// Cap on any single wait.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Only transient errors (`StoreError::is_transient`) are retried. Returns
    /// the final result with the number of attempts made.
    pub async fn run<T, F>(&self, key: &IdempotencyKey, mut op: F) -> (Result<T, StoreError>, u32)
    where
        F: FnMut() -> Result<T, StoreError>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        let mut backoff = self.initial_backoff;

        loop {
            attempt += 1;
            match op() {
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    tracing::debug!(
                        idempotency_key = %key,
                        attempt = %attempt,
                        backoff_ms = %backoff.as_millis(),
                        error = %e,
                        "Ledger write conflict, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.max_backoff);
                }
                result => return (result, attempt),
            }
        }
    }
}
