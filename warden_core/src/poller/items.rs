//! Item-driven poller work shared by every device family.

use super::{PollWork, Poller, PollerCore};
use crate::devices::DeviceProfile;
use crate::transition::Transition;
use tracing::{error, warn};
use warden_common::cancel::CancellationToken;
use warden_common::error::{ItemError, WardenError, WardenResult};
use warden_common::guarded::Guarded;
use warden_common::item::MonitoredItem;
use warden_common::panic::{PanicReason, universal_reason};
use warden_common::store::PanicRecord;

/// Poller over a list of monitored items.
pub type ItemPoller<I> = Poller<ItemWork<I>>;

/// Items of one device family, checked one after the other.
///
/// The list lock is taken per item, so transitions can interleave with a
/// running iteration at item granularity. Its timeout is the poller's
/// alert budget, the longest a single check may legitimately hold it.
pub struct ItemWork<I: MonitoredItem> {
    profile: DeviceProfile,
    items: Guarded<Vec<I>>,
}

impl<I: MonitoredItem> ItemWork<I> {
    pub fn new(profile: DeviceProfile, items: Guarded<Vec<I>>) -> Self {
        Self { profile, items }
    }

    #[inline]
    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn item_count(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }

    /// Run `f` on every item, without short-circuiting.
    fn for_each(&self, what: &str, mut f: impl FnMut(&mut I) -> bool) -> bool {
        match self.items.lock() {
            Ok(mut items) => items.iter_mut().fold(true, |ok, item| f(item) && ok),
            Err(e) => {
                warn!(device = %self.profile.device, "{} skipped: {}", what, e);
                false
            }
        }
    }

    /// Check one item. `Ok(None)` once the list shrank below `idx`.
    fn check_item(
        &self,
        core: &PollerCore,
        idx: usize,
    ) -> WardenResult<Option<ItemObservation>> {
        let mut items = self.items.lock()?;
        let Some(item) = items.get_mut(idx) else {
            return Ok(None);
        };

        let panicked = match item.check() {
            Ok(panicked) => panicked,
            Err(ItemError::Cancelled) => return Err(WardenError::Cancelled),
            Err(e) => {
                warn!(poller = core.name(), item = item.id(), "Check failed: {}", e);
                true
            }
        };
        let observation = ItemObservation {
            panicked,
            shut_down: item.has_shut_down(),
        };
        if !panicked {
            return Ok(Some(observation));
        }

        core.touch_heartbeat()?;
        let panic = item.panic();
        let reason = if panic.is_panic() {
            universal_reason(panic)
        } else {
            PanicReason::GeneralError
        };
        let id = item.id().to_string();
        let hold_back = item.hold_back();

        if hold_back || !core.status()?.triggers_on_error() {
            warn!(poller = core.name(), item = %id, %reason, hold_back, "Panic recorded");
            core.ctx().store.record_panic(PanicRecord {
                at: core.ctx().clock.utc_now(),
                device: core.device(),
                source_id: id,
                reason,
            });
            return Ok(Some(observation));
        }

        error!(poller = core.name(), item = %id, %reason, "Panic while armed");
        core.ctx().fire(core.device(), &id, reason);

        if core.settings().auto_safe_mode {
            // members are already locked here, cascade on them directly
            if core.commit_status(Transition::SafeMode).is_some() {
                for member in items.iter_mut() {
                    member.enter_safe_mode();
                }
            }
            core.ctx().store.enter_safe_mode(true);
        }
        Ok(Some(observation))
    }
}

struct ItemObservation {
    panicked: bool,
    shut_down: bool,
}

impl<I: MonitoredItem + 'static> PollWork for ItemWork<I> {
    fn iterate(&self, core: &PollerCore, cancel: &CancellationToken) -> WardenResult<()> {
        core.checkpoint(cancel)?;
        let count = self.items.lock()?.len();

        let mut any_panic = false;
        let mut any_shut_down = false;
        for idx in 0..count {
            let Some(observation) = self.check_item(core, idx)? else {
                break;
            };
            any_panic |= observation.panicked;
            any_shut_down |= observation.shut_down;
            core.checkpoint(cancel)?;
        }

        core.set_has_shut_down(any_shut_down);
        if any_panic {
            core.mark_panicked();
        }
        Ok(())
    }

    fn cascade(&self, op: Transition) -> bool {
        self.for_each("cascade", |item| match op {
            Transition::StartMonitoring => item.start_monitoring(),
            Transition::StopMonitoring => item.stop_monitoring(),
            Transition::Arm => item.arm_panic_mode(),
            Transition::Disarm => item.disarm_panic_mode(),
            Transition::SafeMode => item.enter_safe_mode(),
            Transition::Holdback => item.enter_hold_back_mode(),
        })
    }

    fn can_be_armed(&self, _core: &PollerCore) -> bool {
        self.for_each("arming check", |item| item.can_be_armed())
    }

    fn reset_panic(&self) -> bool {
        let mut changed = false;
        self.for_each("panic reset", |item| {
            changed |= item.reset_panic();
            true
        });
        changed
    }

    fn attach(&self, cancel: &CancellationToken) {
        self.for_each("token attach", |item| {
            item.set_cancellation_token(cancel.clone());
            true
        });
    }

    fn detach(&self) {
        self.for_each("token detach", |item| {
            item.remove_cancellation_token();
            true
        });
    }

    fn has_live_higher_priority_item(&self, own_priority: u32) -> bool {
        if !self.profile.reports_peer_liveness {
            return false;
        }
        match self.items.lock() {
            Ok(items) => items.iter().any(|item| {
                item.is_live() && item.mail_priority().is_some_and(|p| p > own_priority)
            }),
            // unknown peers block mail
            Err(_) => true,
        }
    }
}
