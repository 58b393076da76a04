//! Poller mode transitions.
//!
//! Stopped → Monitoring ↔ Holdback → Armed ↔ SafeMode, with Disarm back to
//! Monitoring and StopMonitoring from everywhere. The table below is the
//! only place that decides legality; arming additionally requires the
//! poller's `can_be_armed` gate.

use std::fmt;
use warden_common::status::PollerStatus;

/// Operation requested on a poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    StartMonitoring,
    StopMonitoring,
    Arm,
    Disarm,
    SafeMode,
    Holdback,
}

/// Result of checking a transition against the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition allowed: new status.
    Ok(PollerStatus),
    /// Transition rejected: reason.
    Rejected(&'static str),
}

impl Transition {
    pub const ALL: [Transition; 6] = [
        Transition::StartMonitoring,
        Transition::StopMonitoring,
        Transition::Arm,
        Transition::Disarm,
        Transition::SafeMode,
        Transition::Holdback,
    ];

    /// Look up the transition from `from`.
    pub const fn apply(self, from: PollerStatus) -> TransitionResult {
        use PollerStatus::*;

        match (self, from) {
            (Transition::StartMonitoring, Stopped) => TransitionResult::Ok(Monitoring),
            (Transition::StartMonitoring, _) => TransitionResult::Rejected("already monitoring"),

            (Transition::StopMonitoring, Stopped) => TransitionResult::Rejected("not monitoring"),
            (Transition::StopMonitoring, _) => TransitionResult::Ok(Stopped),

            (Transition::Arm, Monitoring | Holdback) => TransitionResult::Ok(Armed),
            (Transition::Arm, _) => TransitionResult::Rejected("arming needs Monitoring or Holdback"),

            (Transition::Disarm, Armed | Holdback | SafeMode) => TransitionResult::Ok(Monitoring),
            (Transition::Disarm, _) => TransitionResult::Rejected("not armed"),

            (Transition::SafeMode, Armed | SafeMode) => TransitionResult::Ok(SafeMode),
            (Transition::SafeMode, _) => TransitionResult::Rejected("safe mode needs Armed"),

            (Transition::Holdback, Monitoring) => TransitionResult::Ok(Holdback),
            (Transition::Holdback, _) => TransitionResult::Rejected("holdback needs Monitoring"),
        }
    }

    /// Transition undoing a partially committed fan-out of `self`, if any.
    pub const fn rollback(self) -> Option<Transition> {
        match self {
            Transition::Arm | Transition::Holdback => Some(Transition::Disarm),
            Transition::StartMonitoring => Some(Transition::StopMonitoring),
            Transition::StopMonitoring | Transition::Disarm | Transition::SafeMode => None,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Transition::StartMonitoring => "StartMonitoring",
            Transition::StopMonitoring => "StopMonitoring",
            Transition::Arm => "ArmPanicMode",
            Transition::Disarm => "DisarmPanicMode",
            Transition::SafeMode => "EnterSafeMode",
            Transition::Holdback => "EnterHoldBackMode",
        };
        f.write_str(name)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
