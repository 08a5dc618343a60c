//! Exponential-backoff retry for transient I/O failures.
//!
//! The tailer wraps live-file reads in [`retry`]: transient errors are
//! retried with a doubling delay, permanent errors abort immediately,
//! and cancellation interrupts a pending backoff sleep rather than
//! waiting it out.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Backoff parameters.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Delay ceiling.
    pub max_delay: Duration,
    /// Give up once this much time has elapsed since the first attempt.
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            max_elapsed: Duration::from_secs(60),
        }
    }
}

/// Why a [`retry`] call gave up.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError<E> {
    /// The operation failed with an error classified as permanent.
    #[error("permanent failure: {0}")]
    Permanent(E),

    /// Retries continued past the policy's elapsed-time budget.
    #[error("retries exhausted: {0}")]
    Exhausted(E),

    /// The cancellation token fired while waiting to retry.
    #[error("retry cancelled")]
    Cancelled,
}

/// Run `op` until it succeeds, retrying transient failures with
/// exponential backoff.
///
/// `is_transient` classifies errors: `false` aborts the retry loop and
/// surfaces the error as [`RetryError::Permanent`].
pub async fn retry<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    is_transient: C,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let started = Instant::now();
    let mut delay = policy.initial_delay;
    let mut attempt: u32 = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !is_transient(&err) => return Err(RetryError::Permanent(err)),
            Err(err) => {
                if started.elapsed() + delay > policy.max_elapsed {
                    return Err(RetryError::Exhausted(err));
                }
                attempt += 1;
                debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying after transient failure");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = (delay * 2).min(policy.max_delay);
            }
        }
    }
}
