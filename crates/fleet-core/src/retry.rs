//! Bounded retry with fixed backoff.
//!
//! Used for lease acquisition and deletion-protection authorization: both
//! retry only a specific, recognized error and fail fast on anything else.

use std::future::Future;
use std::time::Duration;

/// How many times to retry, and how long to wait between attempts.
///
/// `max_retries` counts retries after the first attempt, so a policy with
/// zero retries runs the operation exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Run once, never retry.
    pub fn once() -> Self {
        Self::new(0, Duration::ZERO)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent. The last error is returned on exhaustion.
///
/// `on_retry(attempt, &err)` fires before each sleep, with `attempt`
/// counting from 1.
pub async fn retry<T, E, F, Fut, P, R>(
    policy: RetryPolicy,
    is_retryable: P,
    mut on_retry: R,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    R: FnMut(u32, &E),
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries && is_retryable(&e) => {
                attempt += 1;
                on_retry(attempt, &e);
                if !policy.backoff.is_zero() {
                    tokio::time::sleep(policy.backoff).await;
                }
            }
            Err(e) => return Err(e),
        }
    }
}
