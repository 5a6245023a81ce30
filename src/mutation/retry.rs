// Bounded fixed-delay retry for remote mutations.
//
// Attempts run strictly one after another. Every failure is retried the same
// way (no backoff, no jitter) until the attempt budget is spent, then the
// last error is returned.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::Result;

/// Total attempts, including the first.
pub const MAX_ATTEMPTS: u32 = 3;

/// Pause between consecutive attempts.
pub const RETRY_DELAY: Duration = Duration::from_millis(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            delay: RETRY_DELAY,
        }
    }
}

/// Run `operation` until it succeeds or `policy.max_attempts` attempts
/// have failed.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= max_attempts => return Err(err),
            Err(err) => {
                warn!(
                    error = %err,
                    attempt,
                    max_attempts,
                    "Attempt failed, retrying in {}ms",
                    policy.delay.as_millis(),
                );
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}
