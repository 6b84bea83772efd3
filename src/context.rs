//! Request-scoped cancellation and deadlines
//!
//! Every async operation in this crate takes a Context as its first
//! parameter. The context carries an optional deadline and a cancellation
//! signal that waiters check between ticks and observe during sleeps.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time;

/// Cancellation and deadline carrier shared across async boundaries.
///
/// Cloning is cheap; all clones observe the same signal.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    deadline: Option<Instant>,
    done: watch::Receiver<bool>,
    _done_tx: watch::Sender<bool>,
}

impl Context {
    pub fn new() -> Self {
        let (done_tx, done_rx) = watch::channel(false);

        Self {
            inner: Arc::new(ContextInner {
                deadline: None,
                done: done_rx,
                _done_tx: done_tx,
            }),
        }
    }

    /// Returns a context that cancels itself once `timeout` has elapsed.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Returns a context that cancels itself at `deadline`.
    pub fn with_deadline(self, deadline: Instant) -> Self {
        let (done_tx, done_rx) = watch::channel(false);

        let done_tx_clone = done_tx.clone();
        tokio::spawn(async move {
            time::sleep_until(deadline.into()).await;
            let _ = done_tx_clone.send(true);
        });

        Self {
            inner: Arc::new(ContextInner {
                deadline: Some(deadline),
                done: done_rx,
                _done_tx: done_tx,
            }),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.done.borrow()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Returns a receiver that observes the cancellation signal, for use
    /// inside `tokio::select!` arms.
    pub fn done(&self) -> watch::Receiver<bool> {
        self.inner.done.clone()
    }

    pub fn cancel(&self) {
        let _ = self.inner._done_tx.send(true);
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn timeout_cancels_context() {
        let ctx = Context::new().with_timeout(Duration::from_millis(50));

        assert!(!ctx.is_cancelled());

        sleep(Duration::from_millis(100)).await;

        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn manual_cancel_is_visible_to_clones() {
        let ctx = Context::new();
        let clone = ctx.clone();

        assert!(!clone.is_cancelled());

        ctx.cancel();

        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn deadline_reported_only_when_set() {
        let ctx = Context::new();
        assert!(ctx.deadline().is_none());

        let ctx = ctx.with_timeout(Duration::from_secs(1));
        assert!(ctx.deadline().is_some());
    }

    #[tokio::test]
    async fn done_receiver_wakes_on_cancel() {
        let ctx = Context::new();
        let mut done = ctx.done();

        ctx.cancel();

        done.changed().await.expect("cancellation signal");
        assert!(*done.borrow());
    }
}
