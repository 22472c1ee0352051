//! Cancellable interval wait
//!
//! The scheduler loop sleeps on a [`Ticker`] instead of `thread::sleep`, so
//! [`CancelSignal::cancel`] wakes it immediately rather than after the
//! current interval runs out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Shared, clonable cancellation flag with wakeup
#[derive(Clone, Default)]
pub struct CancelSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake every waiter. Idempotent.
    pub fn cancel(&self) {
        let (flag, cond) = &*self.inner;
        *flag.lock() = true;
        cond.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Wait up to `timeout` for cancellation. Returns whether it was cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cond) = &*self.inner;
        // Past the end of `Instant` means wait until cancelled
        let deadline = Instant::now().checked_add(timeout);
        let mut cancelled = flag.lock();
        while !*cancelled {
            match deadline {
                Some(deadline) => {
                    if cond.wait_until(&mut cancelled, deadline).timed_out() {
                        break;
                    }
                }
                None => cond.wait(&mut cancelled),
            }
        }
        *cancelled
    }
}

/// Why a [`Ticker::wait`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Elapsed,
    Cancelled,
}

/// Interval waits that end early on cancellation
#[derive(Clone)]
pub struct Ticker {
    cancel: CancelSignal,
}

impl Ticker {
    pub fn new(cancel: CancelSignal) -> Self {
        Self { cancel }
    }

    pub fn signal(&self) -> &CancelSignal {
        &self.cancel
    }

    pub fn wait(&self, interval: Duration) -> Tick {
        if self.cancel.wait_timeout(interval) {
            Tick::Cancelled
        } else {
            Tick::Elapsed
        }
    }
}
