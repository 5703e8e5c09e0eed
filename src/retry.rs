//! Bounded retry/backoff for `SchedulerError::ConcurrentUpdate` (§7):
//! default 5 attempts, ~100ms initial delay, doubling.

use std::future::Future;
use std::time::Duration;

use crate::errors::{Result, SchedulerError};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5, initial_delay: Duration::from_millis(100) }
    }
}

/// Run `f` until it succeeds, exhausts `policy.max_attempts`, or fails
/// with a non-retryable error. Only `ConcurrentUpdate` and `Retryable`
/// are retried locally; every other error is returned immediately.
pub async fn with_retry<F, Fut, T>(policy: RetryPolicy, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = policy.initial_delay;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                tracing::debug!(attempt, %err, "retrying after backoff");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(err) => return Err(err),
        }
    }
}
