//! One-shot latch and the cancellation token built on it.
//!
//! Loop sleeps are interruptible waits on the token, so a stop request
//! surfaces within one sleep interval at most.

use crate::error::{ItemError, WardenError};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A flag that can be set once and waited on.
#[derive(Debug, Default)]
pub struct Latch {
    set: Mutex<bool>,
    cond: Condvar,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the latch and wake every waiter.
    pub fn set(&self) {
        let mut set = self.set.lock();
        *set = true;
        self.cond.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *self.set.lock()
    }

    /// Wait until set or until `timeout` elapses. Returns whether it is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut set = self.set.lock();
        while !*set {
            if self.cond.wait_until(&mut set, deadline).timed_out() {
                break;
            }
        }
        *set
    }
}

/// Cloneable handle to a shared cancellation latch.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    latch: Arc<Latch>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.latch.set();
    }

    pub fn is_cancelled(&self) -> bool {
        self.latch.is_set()
    }

    /// Interruptible sleep. Returns `true` if cancelled before `timeout`.
    pub fn sleep(&self, timeout: Duration) -> bool {
        self.latch.wait_timeout(timeout)
    }

    /// Co-operative check for poller bookkeeping.
    pub fn check(&self) -> Result<(), WardenError> {
        if self.is_cancelled() {
            Err(WardenError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Co-operative check for item implementations.
    pub fn check_item(&self) -> Result<(), ItemError> {
        if self.is_cancelled() {
            Err(ItemError::Cancelled)
        } else {
            Ok(())
        }
    }
}
