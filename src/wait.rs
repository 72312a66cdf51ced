//! Awaitable wait primitives.
//!
//! Every suspension in a capture run (settle delays, per-image load races,
//! per-asset fetch bounds) goes through a `Waiter`, which combines a `Clock`
//! with a `CancelToken`. Production code uses `TokioClock`; tests use
//! `VirtualClock`, whose sleeps complete immediately and are recorded, so
//! timing behaviour is testable without wall-clock waits.

use crate::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

/// Source of sleeps
pub trait Clock: Send + Sync {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Wall-clock sleeps on the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }
}

/// A clock whose sleeps finish immediately
///
/// Each requested duration is recorded. Because sleeps are always ready, a
/// race against a pending future resolves as a timeout without waiting, while
/// a race against a ready future still yields its value.
#[derive(Debug, Default, Clone)]
pub struct VirtualClock {
    requested: Arc<Mutex<Vec<Duration>>>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Durations requested so far, in request order.
    pub fn requested(&self) -> Vec<Duration> {
        self.requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sum of all requested durations.
    pub fn elapsed(&self) -> Duration {
        self.requested().into_iter().sum()
    }
}

impl Clock for VirtualClock {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(duration);
        futures::future::ready(()).boxed()
    }
}

/// Cooperative cancellation shared between a run and its caller
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // sender gone without cancelling: never resolves
                futures::future::pending::<()>().await;
            }
        }
    }
}

/// Clock + cancellation for one run
#[derive(Clone)]
pub struct Waiter {
    clock: Arc<dyn Clock>,
    cancel: CancelToken,
}

impl Waiter {
    pub fn new(clock: Arc<dyn Clock>, cancel: CancelToken) -> Self {
        Self { clock, cancel }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Fail with `Error::Cancelled` if the run was cancelled.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Fixed settle delay.
    pub async fn settle(&self, ms: u64) -> Result<()> {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = self.clock.sleep(Duration::from_millis(ms)) => Ok(()),
        }
    }

    /// Race `fut` against a timeout. `None` when the timeout (or
    /// cancellation) wins; the future is dropped in that case.
    pub async fn race<F>(&self, fut: F, ms: u64) -> Option<F::Output>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            out = fut => Some(out),
            _ = self.cancel.cancelled() => None,
            _ = self.clock.sleep(Duration::from_millis(ms)) => None,
        }
    }
}
