//! Convergence polling over eventually consistent remote state
//!
//! Remote APIs frequently acknowledge a mutation before the change is
//! observable, and may briefly report a freshly created resource as
//! missing. The ConvergencePoller drives a caller-supplied StateSource
//! until the classified status stabilizes at a target for a configured
//! number of consecutive observations, tolerating a bounded not-found
//! window, sleeping with jittered backoff between ticks and enforcing a
//! hard overall deadline.

use crate::context::Context;
use crate::error::BoxError;
use async_trait::async_trait;
use rand::Rng;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time;

/// Remote state seam driven by the poller.
///
/// `fetch` reads the current remote snapshot, returning `Ok(None)` when
/// the resource is not found; `classify` maps a snapshot to a status
/// string. Adapters are expected to classify through their own closed
/// status enums and hand the poller the string form.
#[async_trait]
pub trait StateSource: Send {
    type Snapshot: Send + fmt::Debug;

    async fn fetch(&mut self) -> std::result::Result<Option<Self::Snapshot>, BoxError>;

    fn classify(&self, snapshot: &Self::Snapshot) -> String;
}

/// Timing and tolerance configuration for one poll invocation.
///
/// Tolerance counts vary per resource family (highly eventually
/// consistent backends need more consecutive observations); they are
/// always supplied by the adapter rather than defaulted here.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Overall deadline for the poll.
    pub timeout: Duration,
    /// Wait before the first fetch.
    pub delay: Duration,
    /// Floor for the interval between ticks.
    pub min_timeout: Duration,
    /// Ceiling for the interval between ticks.
    pub max_timeout: Duration,
    /// Consecutive target observations required to converge.
    pub continuous_target_occurrence: u32,
    /// Consecutive not-found fetches tolerated before failing.
    pub not_found_checks: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            delay: Duration::ZERO,
            min_timeout: Duration::from_millis(100),
            max_timeout: Duration::from_secs(10),
            continuous_target_occurrence: 1,
            not_found_checks: 0,
        }
    }
}

/// Terminal outcome of a poll.
///
/// `Ok(Some(snapshot))` converged on a target status; `Ok(None)` converged
/// on absence (empty target set). Pending never escapes the loop.
pub type PollResult<T> = std::result::Result<Option<T>, WaitError<T>>;

/// Terminal failure of a poll, carrying the last observed snapshot where
/// one exists.
#[derive(Debug, thiserror::Error)]
pub enum WaitError<T: fmt::Debug> {
    #[error("State refresh failed: {source}")]
    Fetch { source: BoxError, last: Option<T> },

    #[error("Unexpected status {status:?}, waiting for one of {target:?}")]
    UnexpectedStatus {
        status: String,
        target: Vec<String>,
        last: Option<T>,
    },

    #[error("Resource not found after {checks} consecutive checks")]
    NotFound { checks: u32, last: Option<T> },

    #[error("Timeout after {timeout:?} waiting for one of {target:?} (last status: {last_status:?})")]
    Timeout {
        timeout: Duration,
        target: Vec<String>,
        last_status: Option<String>,
        last: Option<T>,
    },

    #[error("Wait cancelled")]
    Cancelled { last: Option<T> },
}

impl<T: fmt::Debug> WaitError<T> {
    /// The last snapshot observed before the failure, if any.
    pub fn last_snapshot(&self) -> Option<&T> {
        match self {
            WaitError::Fetch { last, .. }
            | WaitError::UnexpectedStatus { last, .. }
            | WaitError::NotFound { last, .. }
            | WaitError::Timeout { last, .. }
            | WaitError::Cancelled { last } => last.as_ref(),
        }
    }
}

/// Generic bounded polling loop.
///
/// Configured once with the pending/target status sets and the timing,
/// then driven against any StateSource. An empty target set waits for
/// absence: the poll converges with `Ok(None)` once the source reports
/// not-found for the required number of consecutive observations, which
/// is how deletion is awaited.
#[derive(Debug, Clone)]
pub struct ConvergencePoller {
    pending: Vec<String>,
    target: Vec<String>,
    config: PollConfig,
}

impl ConvergencePoller {
    pub fn new(config: PollConfig) -> Self {
        Self {
            pending: Vec::new(),
            target: Vec::new(),
            config,
        }
    }

    /// Statuses that keep the poll waiting and reset a target run.
    pub fn pending<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending = statuses.into_iter().map(Into::into).collect();
        self
    }

    /// Statuses that count toward convergence.
    pub fn target<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target = statuses.into_iter().map(Into::into).collect();
        self
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Drives `source` until convergence, failure, timeout or
    /// cancellation. Counters and the deadline are owned by this call, so
    /// any number of polls may run concurrently on one poller.
    pub async fn poll<S>(&self, ctx: &Context, source: &mut S) -> PollResult<S::Snapshot>
    where
        S: StateSource,
    {
        let config = &self.config;
        let required = config.continuous_target_occurrence.max(1);
        let started = Instant::now();
        let mut deadline = started + config.timeout;
        if let Some(ctx_deadline) = ctx.deadline() {
            deadline = deadline.min(ctx_deadline);
        }
        let mut done = ctx.done();

        if !config.delay.is_zero() {
            // The delay counts against the overall deadline like any
            // other sleep.
            let wait = config.delay.min(deadline.saturating_duration_since(started));
            tokio::select! {
                _ = time::sleep(wait) => {}
                _ = done.changed() => return Err(WaitError::Cancelled { last: None }),
            }
            if Instant::now() >= deadline {
                return Err(self.timeout_error(None, None));
            }
        }

        let mut occurrences: u32 = 0;
        let mut not_found: u32 = 0;
        let mut waiting_ticks: u32 = 0;
        let mut last: Option<S::Snapshot> = None;
        let mut last_status: Option<String> = None;

        loop {
            if ctx.is_cancelled() {
                return Err(WaitError::Cancelled { last });
            }

            match source.fetch().await {
                Err(source_err) => {
                    return Err(WaitError::Fetch {
                        source: source_err,
                        last,
                    });
                }
                Ok(None) if self.target.is_empty() => {
                    // Absence is the goal here; a missing resource counts
                    // as a target observation.
                    occurrences += 1;
                    tracing::trace!(
                        "resource absent ({}/{} consecutive observations)",
                        occurrences,
                        required
                    );
                    if occurrences >= required {
                        tracing::debug!("converged on absence after {:?}", started.elapsed());
                        return Ok(None);
                    }
                }
                Ok(None) => {
                    not_found += 1;
                    if not_found > config.not_found_checks {
                        return Err(WaitError::NotFound {
                            checks: not_found,
                            last,
                        });
                    }
                    tracing::trace!(
                        "resource not found, tolerating ({}/{})",
                        not_found,
                        config.not_found_checks
                    );
                }
                Ok(Some(snapshot)) => {
                    not_found = 0;
                    let status = source.classify(&snapshot);
                    if self.target.iter().any(|t| *t == status) {
                        occurrences += 1;
                        tracing::trace!(
                            "status {:?} in target set ({}/{} consecutive observations)",
                            status,
                            occurrences,
                            required
                        );
                        if occurrences >= required {
                            tracing::debug!(
                                "converged on {:?} after {:?}",
                                status,
                                started.elapsed()
                            );
                            return Ok(Some(snapshot));
                        }
                    } else if self.pending.iter().any(|p| *p == status) {
                        occurrences = 0;
                        tracing::trace!("status {:?} still pending", status);
                    } else {
                        return Err(WaitError::UnexpectedStatus {
                            status,
                            target: self.target.clone(),
                            last: Some(snapshot),
                        });
                    }
                    last_status = Some(status);
                    last = Some(snapshot);
                }
            }

            // Backoff grows only while no target run is under way;
            // confirmation ticks keep a steady cadence.
            if occurrences == 0 {
                waiting_ticks += 1;
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(self.timeout_error(last_status, last));
            }
            let interval = backoff_interval(
                waiting_ticks.max(1),
                config.min_timeout,
                config.max_timeout,
            )
            .min(deadline - now);
            tracing::trace!("waiting {:?} before next refresh", interval);
            tokio::select! {
                _ = time::sleep(interval) => {}
                _ = done.changed() => return Err(WaitError::Cancelled { last }),
            }
            if Instant::now() >= deadline {
                return Err(self.timeout_error(last_status, last));
            }
        }
    }

    fn timeout_error<T: fmt::Debug>(
        &self,
        last_status: Option<String>,
        last: Option<T>,
    ) -> WaitError<T> {
        WaitError::Timeout {
            timeout: self.config.timeout,
            target: self.target.clone(),
            last_status,
            last,
        }
    }
}

/// Sleep interval for the nth waiting tick: exponential growth from `min`
/// capped at `max`, with jitter spread uniformly above the floor. The
/// floor is exact, so a caller relying on a minimum cadence gets it; when
/// the floor exceeds the ceiling the floor wins.
pub(crate) fn backoff_interval(attempt: u32, min: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let ceiling = min.saturating_mul(1u32 << exponent).min(max).max(min);
    if ceiling <= min {
        return min;
    }
    let span = ceiling - min;
    min + span.mul_f64(rand::thread_rng().gen_range(0.0..1.0))
}
