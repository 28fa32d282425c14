//! Bounded exponential backoff for transient storage errors.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::StoreError;

/// Retry policy applied to transient storage errors.
///
/// Attempt `n` (zero-based) that fails transiently waits
/// `min(initial_backoff * 2^n, max_backoff)` before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first. Values below one are
    /// treated as one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay to wait after the zero-based `attempt` failed.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Runs `operation` until it succeeds, fails with a non-transient error,
    /// or the attempt budget is exhausted.
    ///
    /// # Errors
    ///
    /// Returns the first non-transient error, or the last transient error
    /// once every attempt has failed.
    pub async fn run<T, F, Fut>(&self, operation_name: &str, operation: F) -> Result<T, StoreError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.run_inner(operation_name, None, operation).await
    }

    /// Like [`RetryPolicy::run`], but gives up with `StoreError::Cancelled`
    /// when `cancel` fires during a backoff delay.
    ///
    /// # Errors
    ///
    /// As for [`RetryPolicy::run`], plus `StoreError::Cancelled`.
    pub async fn run_cancellable<T, F, Fut>(
        &self,
        operation_name: &str,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.run_inner(operation_name, Some(cancel), operation).await
    }

    async fn run_inner<T, F, Fut>(
        &self,
        operation_name: &str,
        cancel: Option<&CancellationToken>,
        mut operation: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match operation(attempt).await {
                Err(err) if err.is_transient() && attempt + 1 < attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "transient storage error, retrying"
                    );
                    match cancel {
                        Some(cancel) => tokio::select! {
                            biased;
                            () = cancel.cancelled() => return Err(StoreError::Cancelled),
                            () = tokio::time::sleep(delay) => {}
                        },
                        None => tokio::time::sleep(delay).await,
                    }
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
