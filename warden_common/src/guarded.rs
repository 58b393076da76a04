//! Bounded-wait guarded value.
//!
//! Every cross-thread field that needs read-modify-write goes through a
//! [`Guarded`]. Acquisition waits at most the configured duration and then
//! fails with [`LockTimeout`] instead of blocking forever, turning a
//! potential deadlock into a logged fault.
//!
//! Plain set-only flags use atomics directly.

use crate::error::LockTimeout;
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::time::Duration;
use tracing::error;

/// Mutex-protected value with a bounded acquire.
pub struct Guarded<T> {
    name: &'static str,
    timeout: Duration,
    inner: Mutex<T>,
}

impl<T> Guarded<T> {
    pub fn new(name: &'static str, value: T, timeout: Duration) -> Self {
        Self {
            name,
            timeout,
            inner: Mutex::new(value),
        }
    }

    /// Field name used in lock-timeout reports.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Configured bounded wait.
    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Acquire the lock, waiting at most [`Self::timeout`].
    pub fn lock(&self) -> Result<MutexGuard<'_, T>, LockTimeout> {
        self.inner.try_lock_for(self.timeout).ok_or_else(|| {
            let err = LockTimeout {
                name: self.name,
                waited_ms: self.timeout.as_millis() as u64,
            };
            error!("{}", err);
            err
        })
    }

    /// Replace the value.
    pub fn set(&self, value: T) -> Result<(), LockTimeout> {
        *self.lock()? = value;
        Ok(())
    }

    /// Run `f` with exclusive access and return its result.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, LockTimeout> {
        let mut guard = self.lock()?;
        Ok(f(&mut guard))
    }
}

impl<T: Clone> Guarded<T> {
    /// Copy out the current value.
    pub fn get(&self) -> Result<T, LockTimeout> {
        Ok(self.lock()?.clone())
    }
}

impl<T: fmt::Debug> fmt::Debug for Guarded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("Guarded");
        dbg.field("name", &self.name);
        match self.inner.try_lock() {
            Some(v) => dbg.field("value", &*v),
            None => dbg.field("value", &"<locked>"),
        };
        dbg.finish()
    }
}

static_assertions::assert_impl_all!(Guarded<u64>: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn get_set_update() {
        let g = Guarded::new("count", 1u64, Duration::from_millis(50));
        assert_eq!(g.get().unwrap(), 1);
        g.set(5).unwrap();
        let prev = g.update(|v| {
            let prev = *v;
            *v += 1;
            prev
        });
        assert_eq!(prev.unwrap(), 5);
        assert_eq!(g.get().unwrap(), 6);
    }

    #[test]
    fn held_lock_times_out() {
        let g = Arc::new(Guarded::new("status", 0u8, Duration::from_millis(20)));
        let _held = g.lock().unwrap();

        let other = Arc::clone(&g);
        let result = thread::spawn(move || other.get()).join().unwrap();
        assert_eq!(
            result,
            Err(LockTimeout {
                name: "status",
                waited_ms: 20
            })
        );
    }

    #[test]
    fn debug_does_not_block_when_locked() {
        let g = Guarded::new("t0", 3i32, Duration::from_millis(10));
        let _held = g.lock().unwrap();
        assert!(format!("{g:?}").contains("<locked>"));
    }
}
