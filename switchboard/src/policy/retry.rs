//! Bounded retry with per-attempt timeout and fixed backoff.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::CallError;

/// Retry settings applied to every attempt sequence.
///
/// `timeout` bounds one attempt, not the whole sequence. A zero timeout
/// leaves attempts unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryOptions {
    /// Total attempts including the first. 0 behaves like 1.
    pub max_attempts: u32,
    /// Bound on a single attempt.
    pub timeout: Duration,
    /// Delay before each retry.
    pub backoff: Duration,
}

impl RetryOptions {
    /// Create retry options.
    pub fn new(max_attempts: u32, timeout: Duration, backoff: Duration) -> Self {
        Self {
            max_attempts,
            timeout,
            backoff,
        }
    }

    /// Number of attempts a sequence may make.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Run `attempt` until it succeeds, fails terminally, or attempts run out.
    ///
    /// Attempt `i` starts only if attempt `i - 1` failed with a retryable
    /// error. The last error is returned as-is, so an exhausted sequence
    /// looks exactly like a single failure. When `deadline` is set, an
    /// attempt that would start after it is not issued; an attempt already
    /// running is never interrupted by the deadline.
    pub async fn run<T, F, Fut>(
        &self,
        method: &'static str,
        deadline: Option<Instant>,
        mut attempt: F,
    ) -> Result<T, CallError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(CallError::Timeout);
        }

        let attempts = self.attempts();
        let mut n = 1;
        loop {
            let result = if self.timeout.is_zero() {
                attempt(n).await
            } else {
                match tokio::time::timeout(self.timeout, attempt(n)).await {
                    Ok(result) => result,
                    Err(_) => Err(CallError::Timeout),
                }
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            if !error.is_retryable() || n >= attempts {
                return Err(error);
            }
            if deadline.is_some_and(|d| Instant::now() + self.backoff >= d) {
                tracing::debug!(method, attempt = n, "deadline reached, not retrying");
                return Err(error);
            }

            tracing::debug!(
                method,
                attempt = n,
                backoff_ms = u64::try_from(self.backoff.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "retrying call"
            );
            tokio::time::sleep(self.backoff).await;
            n += 1;
        }
    }
}
