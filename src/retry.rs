//! Bounded retry for mutating calls rejected during propagation windows
//!
//! Eventually consistent APIs reject some perfectly valid mutations until
//! related state has propagated, a freshly granted permission or a just
//! released name being the usual suspects. `retry_when` repeats an
//! operation while a caller-supplied classifier deems its error
//! retryable, under a deadline, with the same jittered backoff the
//! poller uses between attempts.

use crate::context::Context;
use crate::poll::backoff_interval;
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time;

/// Timing for one `retry_when` invocation.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Overall deadline for the retry loop.
    pub timeout: Duration,
    /// Floor for the backoff between attempts.
    pub min_backoff: Duration,
    /// Ceiling for the backoff between attempts.
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            min_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// What to do when the deadline arrives while the error is still
/// retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnTimeout {
    /// Surface the timeout together with the last retryable error.
    Fail,
    /// Make one final attempt at the deadline before giving up.
    FinalAttempt,
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E: fmt::Debug + fmt::Display> {
    /// The operation failed with an error the classifier rejected, or the
    /// final attempt failed.
    #[error("{0}")]
    Operation(E),

    #[error("Timeout after {timeout:?}, last error: {last}")]
    Timeout { last: E, timeout: Duration },

    #[error("Retry cancelled")]
    Cancelled,
}

impl<E: fmt::Debug + fmt::Display> RetryError<E> {
    /// The last operation error, if the retry got that far.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::Operation(err) | RetryError::Timeout { last: err, .. } => Some(err),
            RetryError::Cancelled => None,
        }
    }
}

/// Runs `op` until it succeeds, fails non-retryably, or the deadline
/// passes.
///
/// The operation always runs at least once, even with a zero timeout.
/// With [`OnTimeout::FinalAttempt`] the loop rides out the remaining
/// window when the next backoff would cross the deadline and issues one
/// last call, whose error is surfaced verbatim.
pub async fn retry_when<F, Fut, T, E, P>(
    ctx: &Context,
    config: RetryConfig,
    mut op: F,
    retryable: P,
    on_timeout: OnTimeout,
) -> std::result::Result<T, RetryError<E>>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = std::result::Result<T, E>> + Send,
    T: Send,
    E: fmt::Debug + fmt::Display + Send,
    P: Fn(&E) -> bool + Send,
{
    let mut deadline = Instant::now() + config.timeout;
    if let Some(ctx_deadline) = ctx.deadline() {
        deadline = deadline.min(ctx_deadline);
    }
    let mut done = ctx.done();
    let mut attempt: u32 = 1;

    loop {
        if ctx.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!("operation succeeded on attempt {}", attempt);
                }
                return Ok(value);
            }
            Err(err) if !retryable(&err) => return Err(RetryError::Operation(err)),
            Err(err) => {
                let now = Instant::now();
                let wait = backoff_interval(attempt, config.min_backoff, config.max_backoff);
                if now + wait >= deadline {
                    match on_timeout {
                        OnTimeout::Fail => {
                            return Err(RetryError::Timeout {
                                last: err,
                                timeout: config.timeout,
                            });
                        }
                        OnTimeout::FinalAttempt => {
                            let remaining = deadline.saturating_duration_since(now);
                            tracing::debug!(
                                "retryable error, final attempt in {:?}: {}",
                                remaining,
                                err
                            );
                            if !remaining.is_zero() {
                                tokio::select! {
                                    _ = time::sleep(remaining) => {}
                                    _ = done.changed() => return Err(RetryError::Cancelled),
                                }
                            }
                            return op().await.map_err(RetryError::Operation);
                        }
                    }
                }
                tracing::debug!(
                    "retryable error on attempt {}, backing off {:?}: {}",
                    attempt,
                    wait,
                    err
                );
                tokio::select! {
                    _ = time::sleep(wait) => {}
                    _ = done.changed() => return Err(RetryError::Cancelled),
                }
                attempt += 1;
            }
        }
    }
}
