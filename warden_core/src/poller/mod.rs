//! Generic poller.
//!
//! A [`Poller`] pairs a [`PollerCore`] (status, counter, heartbeat, panic
//! flags) with a [`PollWork`] implementation that knows what one loop
//! iteration does. Device families plug in through [`ItemWork`]; the
//! countdown brings its own work type.
//!
//! The controller sees every poller through the object-safe
//! [`Supervised`] trait.

mod state;
mod items;
mod runtime;

pub use state::{CoreSettings, PollerCore};
pub use items::{ItemPoller, ItemWork};
pub use runtime::Poller;
pub(crate) use runtime::{LoopThread, panic_message};

use crate::transition::Transition;
use serde::Serialize;
use std::time::Duration;
use warden_common::cancel::CancellationToken;
use warden_common::error::WardenResult;
use warden_common::panic::DeviceType;
use warden_common::status::PollerStatus;

/// What one poller does per loop iteration, and how its members follow
/// mode transitions.
pub trait PollWork: Send + Sync + 'static {
    /// One iteration. Call `core.checkpoint(cancel)` at every safe point.
    fn iterate(&self, core: &PollerCore, cancel: &CancellationToken) -> WardenResult<()>;

    /// Propagate a committed transition to the members.
    fn cascade(&self, op: Transition) -> bool {
        let _ = op;
        true
    }

    /// Member-level part of the arming gate.
    fn can_be_armed(&self, core: &PollerCore) -> bool {
        let _ = core;
        true
    }

    /// Returns whether any member changed.
    fn reset_panic(&self) -> bool {
        false
    }

    fn attach(&self, _cancel: &CancellationToken) {}

    fn detach(&self) {}

    /// Long-running work in progress that must not count as a hang.
    fn is_busy(&self) -> bool {
        false
    }

    fn has_live_higher_priority_item(&self, own_priority: u32) -> bool {
        let _ = own_priority;
        false
    }
}

/// Operator- and controller-facing poller interface.
pub trait Supervised: Send + Sync {
    fn name(&self) -> &str;
    fn device_type(&self) -> DeviceType;

    /// Start the loop thread. `Err` if a thread already exists.
    fn start_polling_thread(&self) -> WardenResult<bool>;
    /// Stop the loop thread. `Err` if it does not exit within two sleep intervals.
    fn stop_polling_thread(&self) -> WardenResult<bool>;
    fn is_running(&self) -> bool;

    /// Apply `op`; with `what_if` only report whether it would succeed.
    fn apply(&self, op: Transition, what_if: bool) -> bool;

    fn reset_panic(&self) -> bool;

    fn status(&self) -> WardenResult<PollerStatus>;
    fn poller_count(&self) -> WardenResult<u64>;
    fn has_panicked(&self) -> bool;
    fn has_loop_panic(&self) -> bool;
    fn has_shut_down(&self) -> bool;
    fn has_shut_down_verified(&self) -> bool;
    fn can_be_armed(&self) -> bool;
    fn is_poller_unresponsive(&self) -> bool;
    fn alert_budget(&self) -> Duration;
    fn has_live_higher_priority_item(&self, own_priority: u32) -> bool;

    fn arm_panic_mode(&self, what_if: bool) -> bool {
        self.apply(Transition::Arm, what_if)
    }

    fn disarm_panic_mode(&self, what_if: bool) -> bool {
        self.apply(Transition::Disarm, what_if)
    }

    fn enter_safe_mode(&self, what_if: bool) -> bool {
        self.apply(Transition::SafeMode, what_if)
    }

    fn enter_hold_back_mode(&self, what_if: bool) -> bool {
        self.apply(Transition::Holdback, what_if)
    }

    fn start_monitoring(&self, what_if: bool) -> bool {
        self.apply(Transition::StartMonitoring, what_if)
    }

    fn stop_monitoring(&self, what_if: bool) -> bool {
        self.apply(Transition::StopMonitoring, what_if)
    }

    /// Point-in-time view for presentation layers.
    fn view(&self) -> PollerView {
        PollerView {
            name: self.name().to_string(),
            device: self.device_type(),
            status: self.status().ok(),
            poller_count: self.poller_count().ok(),
            running: self.is_running(),
            has_panicked: self.has_panicked(),
            has_loop_panic: self.has_loop_panic(),
            has_shut_down: self.has_shut_down(),
            can_be_armed: self.can_be_armed(),
            unresponsive: self.is_poller_unresponsive(),
        }
    }
}

/// Snapshot of one poller. `None` fields could not be read in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollerView {
    pub name: String,
    pub device: DeviceType,
    pub status: Option<PollerStatus>,
    pub poller_count: Option<u64>,
    pub running: bool,
    pub has_panicked: bool,
    pub has_loop_panic: bool,
    pub has_shut_down: bool,
    pub can_be_armed: bool,
    pub unresponsive: bool,
}
