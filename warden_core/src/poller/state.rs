//! Per-poller bookkeeping shared by the loop thread and the operator side.
//!
//! Status, counter, heartbeat and the shut-down timestamp sit behind
//! [`Guarded`] so every access is bounded. Panic flags are plain atomics.

use crate::context::WardenContext;
use crate::transition::{Transition, TransitionResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use warden_common::cancel::CancellationToken;
use warden_common::config::PollerConfig;
use warden_common::error::{LockTimeout, WardenError, WardenResult};
use warden_common::guarded::Guarded;
use warden_common::panic::{DeviceType, PanicReason};
use warden_common::status::PollerStatus;

/// Timing and arming parameters of one poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreSettings {
    pub sleep_interval: Duration,
    pub alert_budget: Duration,
    pub lock_timeout: Duration,
    pub min_poller_count_to_arm: u64,
    pub auto_safe_mode: bool,
    /// How long `has_shut_down` must hold before it counts as verified.
    pub shutdown_verify: Duration,
}

impl CoreSettings {
    pub fn from_config(config: &PollerConfig, alert_budget: Duration) -> Self {
        Self {
            sleep_interval: config.sleep_interval(),
            alert_budget,
            lock_timeout: config.lock_timeout(),
            min_poller_count_to_arm: config.min_poller_count_to_arm,
            auto_safe_mode: config.auto_safe_mode,
            shutdown_verify: config.shutdown_verify(),
        }
    }
}

pub struct PollerCore {
    name: String,
    device: DeviceType,
    ctx: Arc<WardenContext>,
    settings: CoreSettings,
    status: Guarded<PollerStatus>,
    poller_count: Guarded<u64>,
    heartbeat: Guarded<Instant>,
    shut_down_since: Guarded<Option<Instant>>,
    has_panicked: AtomicBool,
    has_loop_panic: AtomicBool,
    has_shut_down: AtomicBool,
}

impl PollerCore {
    pub fn new(
        name: impl Into<String>,
        device: DeviceType,
        ctx: Arc<WardenContext>,
        settings: CoreSettings,
    ) -> Self {
        let timeout = settings.lock_timeout;
        let now = ctx.clock.now();
        Self {
            name: name.into(),
            device,
            status: Guarded::new("status", PollerStatus::Stopped, timeout),
            poller_count: Guarded::new("poller_count", 0, timeout),
            heartbeat: Guarded::new("heartbeat", now, timeout),
            shut_down_since: Guarded::new("shut_down_since", None, timeout),
            has_panicked: AtomicBool::new(false),
            has_loop_panic: AtomicBool::new(false),
            has_shut_down: AtomicBool::new(false),
            ctx,
            settings,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn device(&self) -> DeviceType {
        self.device
    }

    #[inline]
    pub fn ctx(&self) -> &Arc<WardenContext> {
        &self.ctx
    }

    #[inline]
    pub fn settings(&self) -> &CoreSettings {
        &self.settings
    }

    pub fn status(&self) -> Result<PollerStatus, LockTimeout> {
        self.status.get()
    }

    pub fn poller_count(&self) -> Result<u64, LockTimeout> {
        self.poller_count.get()
    }

    pub(crate) fn increment_count(&self) -> Result<u64, LockTimeout> {
        self.poller_count.update(|c| {
            *c = c.saturating_add(1);
            *c
        })
    }

    /// Fresh start: counter to zero and heartbeat to now.
    pub(crate) fn reset_progress(&self) -> Result<(), LockTimeout> {
        self.poller_count.set(0)?;
        self.touch_heartbeat()
    }

    pub fn touch_heartbeat(&self) -> Result<(), LockTimeout> {
        self.heartbeat.set(self.ctx.clock.now())
    }

    /// Safe point inside a loop iteration: heartbeat, then cancellation.
    pub fn checkpoint(&self, cancel: &CancellationToken) -> WardenResult<()> {
        self.touch_heartbeat()?;
        cancel.check()
    }

    /// Time since the last heartbeat. A clock that went backwards reads as zero.
    pub fn heartbeat_age(&self) -> Result<Duration, LockTimeout> {
        let beat = self.heartbeat.get()?;
        Ok(self.ctx.clock.now().saturating_duration_since(beat))
    }

    /// Heartbeat older than the alert budget, or not readable at all.
    pub fn is_unresponsive(&self) -> bool {
        match self.heartbeat_age() {
            Ok(age) => age > self.settings.alert_budget,
            Err(_) => true,
        }
    }

    // ─── Panic flags ────────────────────────────────────────────────

    #[inline]
    pub fn has_panicked(&self) -> bool {
        self.has_panicked.load(Ordering::SeqCst)
    }

    pub fn mark_panicked(&self) {
        self.has_panicked.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn has_loop_panic(&self) -> bool {
        self.has_loop_panic.load(Ordering::SeqCst)
    }

    /// Loop-fatal fault: both panic flags set, and a GeneralError trigger
    /// when the poller was armed. An unreadable status counts as armed.
    pub(crate) fn record_loop_fault(&self, fault: &WardenError) {
        self.has_loop_panic.store(true, Ordering::SeqCst);
        self.has_panicked.store(true, Ordering::SeqCst);
        error!(poller = %self.name, device = %self.device, "Polling loop fault: {}", fault);

        let armed = self.status().map(PollerStatus::triggers_on_error).unwrap_or(true);
        if armed {
            self.ctx.fire(self.device, &self.name, PanicReason::GeneralError);
        }
    }

    /// Clear both panic flags and the counter. Returns whether a flag was set.
    pub(crate) fn clear_panics(&self) -> bool {
        let panicked = self.has_panicked.swap(false, Ordering::SeqCst);
        let loop_panic = self.has_loop_panic.swap(false, Ordering::SeqCst);
        if let Err(e) = self.poller_count.set(0) {
            warn!(poller = %self.name, "Counter not reset: {}", e);
        }
        panicked || loop_panic
    }

    // ─── Shut-down observation ──────────────────────────────────────

    #[inline]
    pub fn has_shut_down(&self) -> bool {
        self.has_shut_down.load(Ordering::SeqCst)
    }

    /// Store the aggregated item observation, logging only on edges.
    pub fn set_has_shut_down(&self, value: bool) {
        let previous = self.has_shut_down.swap(value, Ordering::SeqCst);
        if previous == value {
            return;
        }
        let since = value.then(|| self.ctx.clock.now());
        if let Err(e) = self.shut_down_since.set(since) {
            warn!(poller = %self.name, "Shut-down timestamp not updated: {}", e);
        }
        if value {
            warn!(poller = %self.name, "Devices report shut down");
        } else {
            info!(poller = %self.name, "Devices report running again");
        }
    }

    /// Shut down for at least `shutdown_verify` without interruption.
    pub fn has_shut_down_verified(&self) -> bool {
        if !self.has_shut_down() {
            return false;
        }
        match self.shut_down_since.get() {
            Ok(Some(since)) => {
                self.ctx.clock.now().saturating_duration_since(since) >= self.settings.shutdown_verify
            }
            Ok(None) | Err(_) => false,
        }
    }

    // ─── Status ─────────────────────────────────────────────────────

    /// Status-level part of the arming gate.
    pub fn status_allows_arming(&self) -> bool {
        let status_ok = matches!(
            self.status(),
            Ok(PollerStatus::Monitoring | PollerStatus::Holdback)
        );
        let count_ok = self
            .poller_count()
            .is_ok_and(|c| c >= self.settings.min_poller_count_to_arm);
        status_ok && count_ok && !self.has_loop_panic() && !self.has_panicked()
    }

    /// Set `to` only if the status is still `from`.
    pub(crate) fn compare_and_set(
        &self,
        from: PollerStatus,
        to: PollerStatus,
    ) -> Result<bool, LockTimeout> {
        self.status.update(|s| {
            if *s == from {
                *s = to;
                true
            } else {
                false
            }
        })
    }

    /// Check and commit `op` under a single status lock.
    ///
    /// Used from inside the loop where the members are already handled by
    /// the caller. Returns the new status on success.
    pub fn commit_status(&self, op: Transition) -> Option<PollerStatus> {
        let result = self.status.update(|s| match op.apply(*s) {
            TransitionResult::Ok(to) => {
                let from = *s;
                *s = to;
                Some((from, to))
            }
            TransitionResult::Rejected(_) => None,
        });
        match result {
            Ok(Some((from, to))) => {
                if from != to {
                    info!(poller = %self.name, "{} -> {} ({})", from, to, op);
                }
                Some(to)
            }
            Ok(None) | Err(_) => None,
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
