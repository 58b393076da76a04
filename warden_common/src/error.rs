//! Error taxonomy shared by pollers, items and the controller.
//!
//! - [`LockTimeout`]: bounded-wait lock acquisition failed.
//! - [`ItemError`]: raised by a monitored item; converted into a per-item
//!   panic at the item boundary unless it is a cancellation.
//! - [`WardenError`]: poller/controller level faults.

use crate::config::ConfigError;
use thiserror::Error;

/// A guarded value could not be locked within its configured wait.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("lock on '{name}' not acquired within {waited_ms}ms")]
pub struct LockTimeout {
    /// Name of the guarded field.
    pub name: &'static str,
    /// Configured bounded wait.
    pub waited_ms: u64,
}

/// Failure reported by a monitored item.
#[derive(Debug, Error)]
pub enum ItemError {
    /// Cooperative cancellation observed inside the item.
    #[error("operation cancelled")]
    Cancelled,

    /// Device command exceeded its timeout after all retries.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// Device answered with an error.
    #[error("device error: {0}")]
    Device(String),

    /// File or process I/O failed.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// Poller and controller faults.
#[derive(Debug, Error)]
pub enum WardenError {
    #[error(transparent)]
    LockTimeout(#[from] LockTimeout),

    /// Cooperative cancellation. Always propagated, never swallowed.
    #[error("cancelled")]
    Cancelled,

    /// `start_polling_thread` called while a loop thread exists.
    #[error("poller '{poller}' already started")]
    AlreadyStarted { poller: String },

    /// Loop thread did not exit in time after cancellation.
    #[error("poller '{poller}' still alive {waited_ms}ms after stop was requested")]
    StopTimeout { poller: String, waited_ms: u64 },

    #[error("failed to spawn loop thread for '{poller}': {source}")]
    ThreadSpawn {
        poller: String,
        #[source]
        source: std::io::Error,
    },

    /// A loop iteration unwound.
    #[error("loop of '{poller}' panicked: {details}")]
    LoopPanicked { poller: String, details: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl WardenError {
    #[inline]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, WardenError::Cancelled)
    }
}

/// Result alias for poller and controller operations.
pub type WardenResult<T> = Result<T, WardenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_timeout_message_names_field() {
        let err = WardenError::from(LockTimeout {
            name: "status",
            waited_ms: 250,
        });
        assert_eq!(err.to_string(), "lock on 'status' not acquired within 250ms");
        assert!(!err.is_cancelled());
    }

    #[test]
    fn stop_timeout_message() {
        let err = WardenError::StopTimeout {
            poller: "fritz".into(),
            waited_ms: 2000,
        };
        assert!(err.to_string().contains("still alive 2000ms"));
    }
}
