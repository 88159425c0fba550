//! Cooperative cancellation.
//!
//! A `CancelToken` is threaded through every call path that may block. All
//! executor operations check it before dispatching and fail fast with
//! [`Error::Cancelled`](crate::Error::Cancelled) once it is set; retry
//! delays wait on it so a cancel wakes sleepers immediately.

use crate::error::{Error, Result};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct Inner {
    cancelled: Mutex<bool>,
    cond: Condvar,
}

/// A cloneable cancellation flag with an interruptible sleep.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation and wake all sleepers.
    pub fn cancel(&self) {
        let mut cancelled = self.inner.cancelled.lock().unwrap();
        *cancelled = true;
        self.inner.cond.notify_all();
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock().unwrap()
    }

    /// Return `Err(Cancelled)` if cancellation has been requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early on cancellation.
    ///
    /// Returns `Err(Cancelled)` if the token was cancelled before or during
    /// the sleep.
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        let deadline = std::time::Instant::now() + duration;
        let mut cancelled = self.inner.cancelled.lock().unwrap();
        loop {
            if *cancelled {
                return Err(Error::Cancelled);
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return Ok(());
            }
            let (guard, _) = self
                .inner
                .cond
                .wait_timeout(cancelled, deadline - now)
                .unwrap();
            cancelled = guard;
        }
    }
}
