//! Retry and fan-out helpers for operations that race against external,
//! asynchronous teardown (engine daemon, overlay filesystems).

use futures_util::stream::{self, StreamExt};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// How many times to try an operation and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

/// Runs `operation` until it succeeds, `should_retry` rejects the error, or
/// the policy's attempts are used up. Returns the last error in the latter
/// two cases.
pub async fn retry_operation<T, E, F, Fut, P>(
    mut operation: F,
    should_retry: P,
    policy: RetryPolicy,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                let try_again = attempt < max_attempts && should_retry(&error);

                if try_again {
                    log::warn!(
                        "Failed operation on attempt {}. Retrying. Error: {}",
                        attempt,
                        error
                    );
                    tokio::time::sleep(policy.delay).await;
                    attempt += 1;
                } else {
                    log::warn!(
                        "Permanently failed on attempt {}. Error: {}",
                        attempt,
                        error
                    );
                    return Err(error);
                }
            }
        }
    }
}

/// Like [`retry_operation`], but yields `fallback` instead of an error.
pub async fn retry_or_default<T, E, F, Fut, P>(
    operation: F,
    should_retry: P,
    policy: RetryPolicy,
    fallback: T,
) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    retry_operation(operation, should_retry, policy)
        .await
        .unwrap_or(fallback)
}

/// Returns whether `future` completed within `timeout`. The future is dropped
/// when the timeout wins.
pub async fn run_with_timeout<F>(future: F, timeout: Duration) -> bool
where
    F: Future,
{
    tokio::time::timeout(timeout, future).await.is_ok()
}

/// Runs `operation` for every source with at most `max_simultaneous` in
/// flight. Results come back in completion order.
pub async fn run_bounded<S, T, F, Fut>(
    sources: impl IntoIterator<Item = S>,
    operation: F,
    max_simultaneous: usize,
) -> Vec<T>
where
    F: Fn(S) -> Fut,
    Fut: Future<Output = T>,
{
    stream::iter(sources)
        .map(operation)
        .buffer_unordered(max_simultaneous.max(1))
        .collect()
        .await
}
