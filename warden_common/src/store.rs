//! Global status store.
//!
//! Holds the append-only [`ControllerStatus`] history, the pending global
//! safe-mode request, recorded panics and the latest countdown snapshot.
//! The main controller is the only writer of the status history.

use crate::panic::{DeviceType, PanicReason};
use crate::status::ControllerStatus;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// One history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub at: DateTime<Utc>,
    pub status: ControllerStatus,
}

/// A panic observed somewhere in the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanicRecord {
    pub at: DateTime<Utc>,
    pub device: DeviceType,
    pub source_id: String,
    pub reason: PanicReason,
}

/// Published countdown state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountdownSnapshot {
    pub t0: Option<DateTime<Utc>>,
    /// Seconds until T0; negative once T0 passed.
    pub seconds_to_t0: Option<i64>,
    pub safe_mode_at: Option<DateTime<Utc>>,
    pub check_shut_down_at: Option<DateTime<Utc>>,
    pub emails_at: Option<DateTime<Utc>>,
    pub safe_mode_triggered: bool,
    pub t0_reached: bool,
    pub countdown_triggered: bool,
    pub shut_down_verified: bool,
    pub mail_sent: bool,
}

/// Status store contract.
pub trait StatusStore: Send + Sync {
    fn current(&self) -> ControllerStatus;
    /// Append a new current status observed at `at`.
    fn push(&self, status: ControllerStatus, at: DateTime<Utc>);
    fn history(&self) -> Vec<StatusEntry>;

    /// Global safe-mode notifier.
    fn enter_safe_mode(&self, requested: bool);
    fn safe_mode_requested(&self) -> bool;

    fn record_panic(&self, record: PanicRecord);
    fn panics(&self) -> Vec<PanicRecord>;
    fn clear_panics(&self);

    fn set_countdown_info(&self, snapshot: CountdownSnapshot);
    fn countdown_info(&self) -> Option<CountdownSnapshot>;
}

/// In-process status store.
#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    history: Mutex<Vec<StatusEntry>>,
    panics: Mutex<Vec<PanicRecord>>,
    countdown: Mutex<Option<CountdownSnapshot>>,
    safe_mode_requested: AtomicBool,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusStore for InMemoryStatusStore {
    fn current(&self) -> ControllerStatus {
        self.history
            .lock()
            .last()
            .map(|e| e.status)
            .unwrap_or_default()
    }

    fn push(&self, status: ControllerStatus, at: DateTime<Utc>) {
        let mut history = self.history.lock();
        let previous = history.last().map(|e| e.status).unwrap_or_default();
        history.push(StatusEntry { at, status });
        info!("Controller status {} -> {}", previous, status);
    }

    fn history(&self) -> Vec<StatusEntry> {
        self.history.lock().clone()
    }

    fn enter_safe_mode(&self, requested: bool) {
        self.safe_mode_requested.store(requested, Ordering::SeqCst);
    }

    fn safe_mode_requested(&self) -> bool {
        self.safe_mode_requested.load(Ordering::SeqCst)
    }

    fn record_panic(&self, record: PanicRecord) {
        self.panics.lock().push(record);
    }

    fn panics(&self) -> Vec<PanicRecord> {
        self.panics.lock().clone()
    }

    fn clear_panics(&self) {
        self.panics.lock().clear();
    }

    fn set_countdown_info(&self, snapshot: CountdownSnapshot) {
        *self.countdown.lock() = Some(snapshot);
    }

    fn countdown_info(&self) -> Option<CountdownSnapshot> {
        self.countdown.lock().clone()
    }
}
