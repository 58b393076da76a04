//! Prelude module for common re-exports.
//!
//! ```rust
//! use warden_common::prelude::*;
//! ```

// ─── Modes ──────────────────────────────────────────────────────────
pub use crate::status::{ControllerStatus, PollerStatus};

// ─── Panics ─────────────────────────────────────────────────────────
pub use crate::panic::{DeviceType, FilePanic, ItemPanic, PanicReason, SwitchPanic, universal_reason};

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    ConfigError, ConfigLoader, CountdownConfig, ControllerConfig, LogLevel, MailConfig,
    PollerConfig, RetryPolicy, SharedConfig, WardenConfig,
};

// ─── Concurrency & time ─────────────────────────────────────────────
pub use crate::cancel::{CancellationToken, Latch};
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::guarded::Guarded;

// ─── Errors ─────────────────────────────────────────────────────────
pub use crate::error::{ItemError, LockTimeout, WardenError, WardenResult};

// ─── Collaborators ──────────────────────────────────────────────────
pub use crate::item::{ItemModeState, MonitoredItem};
pub use crate::mail::{MailKind, MailOutcome, MailSender, SimulatedMailSender};
pub use crate::store::{CountdownSnapshot, InMemoryStatusStore, StatusStore};
pub use crate::trigger::{LogShutdownTrigger, RecordingTrigger, ShutdownTrigger};
