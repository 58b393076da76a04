//! Two-phase fan-out of one transition across a set of pollers.
//!
//! Phase one asks every participant with `what_if = true`. A single refusal
//! aborts before anything changes. Phase two commits poller by poller; when
//! a commit fails, every participant whose status moved is rolled back if
//! the transition has a rollback.

use crate::poller::Supervised;
use crate::transition::Transition;
use std::sync::Arc;
use tracing::{error, info, warn};
use warden_common::status::PollerStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanoutOutcome {
    /// No participant.
    Vacuous,
    /// Dry run refused by the named pollers. Nothing changed.
    Refused(Vec<String>),
    /// Every participant committed.
    Committed(usize),
    /// Some commits failed.
    Partial {
        committed: usize,
        failed: Vec<String>,
        /// Participants whose status changed in phase two, failed ones included.
        moved: usize,
        rolled_back: usize,
    },
}

impl FanoutOutcome {
    #[inline]
    pub fn succeeded(&self) -> bool {
        matches!(self, FanoutOutcome::Vacuous | FanoutOutcome::Committed(_))
    }

    /// Some poller status changed and nothing was rolled back, so the
    /// fleet stands in the new mode even if a commit failed.
    #[inline]
    pub fn fleet_moved(&self) -> bool {
        match self {
            FanoutOutcome::Committed(_) => true,
            FanoutOutcome::Partial {
                committed,
                moved,
                rolled_back,
                ..
            } => (*committed > 0 || *moved > 0) && *rolled_back == 0,
            FanoutOutcome::Vacuous | FanoutOutcome::Refused(_) => false,
        }
    }
}

/// Phase one only. Returns the names of refusing pollers.
pub fn dry_run(pollers: &[Arc<dyn Supervised>], op: Transition) -> Vec<String> {
    pollers
        .iter()
        .filter(|p| !p.apply(op, true))
        .map(|p| p.name().to_string())
        .collect()
}

pub fn two_phase(pollers: &[Arc<dyn Supervised>], op: Transition) -> FanoutOutcome {
    if pollers.is_empty() {
        info!(%op, "No poller configured, nothing to do");
        return FanoutOutcome::Vacuous;
    }

    let refused = dry_run(pollers, op);
    if !refused.is_empty() {
        warn!(%op, ?refused, "Dry run refused, nothing changed");
        return FanoutOutcome::Refused(refused);
    }

    let before: Vec<Option<PollerStatus>> = pollers.iter().map(|p| p.status().ok()).collect();
    let mut committed = 0;
    let mut failed = Vec::new();
    for poller in pollers {
        if poller.apply(op, false) {
            committed += 1;
        } else {
            failed.push(poller.name().to_string());
        }
    }
    if failed.is_empty() {
        return FanoutOutcome::Committed(committed);
    }

    let moved = pollers
        .iter()
        .zip(&before)
        .filter(|(p, previous)| p.status().ok() != **previous)
        .count();
    error!(%op, ?failed, committed, moved, "Commit failed part-way");
    let rolled_back = match op.rollback() {
        Some(undo) => rollback(pollers, &before, undo),
        None => 0,
    };
    FanoutOutcome::Partial {
        committed,
        failed,
        moved,
        rolled_back,
    }
}

/// Undo on every poller whose status moved. Each call is guarded on its own.
fn rollback(
    pollers: &[Arc<dyn Supervised>],
    before: &[Option<PollerStatus>],
    undo: Transition,
) -> usize {
    let mut undone = 0;
    for (poller, previous) in pollers.iter().zip(before) {
        let now = poller.status().ok();
        if now.is_none() || now == *previous {
            continue;
        }
        if poller.apply(undo, false) {
            undone += 1;
        } else {
            warn!(poller = poller.name(), %undo, "Rollback failed");
        }
    }
    undone
}
