//! Poller and controller mode enums.
//!
//! `PollerStatus` is the per-poller lifecycle:
//! Stopped → Monitoring → {Holdback, Armed}; Armed → SafeMode;
//! {Armed, Holdback, SafeMode} → Monitoring; any → Stopped.
//!
//! `ControllerStatus` is the global, history-tracked mode. `ShutDown` and
//! `Triggered` are overlays entered from `Armed`/`SafeMode`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a single poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PollerStatus {
    /// Loop not running or monitoring explicitly stopped.
    #[default]
    Stopped,
    /// Items are checked, panics recorded, nothing fires.
    Monitoring,
    /// Panics recorded but the shutdown trigger is suppressed.
    Holdback,
    /// A panic fires the shutdown trigger.
    Armed,
    /// Items driven to their safe configuration. Terminal until disarm.
    SafeMode,
}

impl PollerStatus {
    /// All variants, in lifecycle order.
    pub const ALL: [PollerStatus; 5] = [
        PollerStatus::Stopped,
        PollerStatus::Monitoring,
        PollerStatus::Holdback,
        PollerStatus::Armed,
        PollerStatus::SafeMode,
    ];

    /// Errors raised inside the loop escalate to a shutdown only in these states.
    #[inline]
    pub const fn triggers_on_error(self) -> bool {
        matches!(self, PollerStatus::Armed | PollerStatus::SafeMode)
    }
}

impl fmt::Display for PollerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Global controller mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ControllerStatus {
    #[default]
    Stopped,
    Monitoring,
    Holdback,
    Armed,
    SafeMode,
    /// A monitored item has flipped to its off/triggered state.
    ShutDown,
    /// The countdown fired its T0 trigger. Never reverted automatically.
    Triggered,
}

impl ControllerStatus {
    /// `Armed` or any mode reachable only through arming.
    #[inline]
    pub const fn is_armed_or_above(self) -> bool {
        matches!(
            self,
            ControllerStatus::Armed
                | ControllerStatus::SafeMode
                | ControllerStatus::ShutDown
                | ControllerStatus::Triggered
        )
    }

    /// `ShutDown` or `Triggered`.
    #[inline]
    pub const fn is_shut_down(self) -> bool {
        matches!(self, ControllerStatus::ShutDown | ControllerStatus::Triggered)
    }
}

impl fmt::Display for ControllerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<PollerStatus> for ControllerStatus {
    fn from(value: PollerStatus) -> Self {
        match value {
            PollerStatus::Stopped => ControllerStatus::Stopped,
            PollerStatus::Monitoring => ControllerStatus::Monitoring,
            PollerStatus::Holdback => ControllerStatus::Holdback,
            PollerStatus::Armed => ControllerStatus::Armed,
            PollerStatus::SafeMode => ControllerStatus::SafeMode,
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
