//! Main controller.
//!
//! Owns the fleet of pollers in a fixed order and is the only writer of the
//! controller status history. Its own loop samples poller state, fires the
//! shutdown trigger for unresponsive pollers, tracks the ShutDown overlay
//! with hysteresis, and publishes the signals the countdown reads.

pub mod fanout;

pub use fanout::FanoutOutcome;

use crate::budget;
use crate::context::WardenContext;
use crate::countdown::CountdownPoller;
use crate::devices::{DeviceProfile, FleetItems};
use crate::poller::{LoopThread, PollerView, Supervised, panic_message};
use crate::transition::Transition;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use warden_common::cancel::CancellationToken;
use warden_common::config::{ControllerConfig, WardenConfig};
use warden_common::error::{WardenError, WardenResult};
use warden_common::guarded::Guarded;
use warden_common::panic::{DeviceType, PanicReason};
use warden_common::status::{ControllerStatus, PollerStatus};
use warden_common::store::CountdownSnapshot;

const THREAD_NAME: &str = "warden-controller";
const OWNER: &str = "controller";

/// Bookkeeping of the ShutDown overlay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct OverlayState {
    /// Status to restore when ShutDown clears.
    prior: Option<ControllerStatus>,
    has_shut_down: bool,
    shut_down_since: Option<DateTime<Utc>>,
}

struct ControllerShared {
    config: ControllerConfig,
    ctx: Arc<WardenContext>,
    pollers: Vec<Arc<dyn Supervised>>,
    countdown: Option<Arc<CountdownPoller>>,
    heartbeat: Guarded<Instant>,
    overlay: Guarded<OverlayState>,
    alert_budget: Duration,
    mail_sending_disabled: AtomicBool,
    /// Serializes fan-outs and the loop's overlay commit.
    operations: Mutex<()>,
}

pub struct MainController {
    shared: Arc<ControllerShared>,
    thread: Mutex<Option<LoopThread>>,
}

impl MainController {
    /// Controller over `pollers` (fleet order) and an optional countdown,
    /// which joins the fleet as its last member.
    pub fn new(
        config: ControllerConfig,
        ctx: Arc<WardenContext>,
        mut pollers: Vec<Arc<dyn Supervised>>,
        countdown: Option<Arc<CountdownPoller>>,
    ) -> Self {
        if let Some(countdown) = &countdown {
            pollers.push(Arc::clone(countdown) as Arc<dyn Supervised>);
        }
        let timeout = config.lock_timeout();
        let per_poller = config.lock_timeout().saturating_mul(pollers.len() as u32);
        let alert_budget = budget::itemless_budget(
            config.alert_time_ms.map(Duration::from_millis),
            config.sleep_interval(),
            per_poller,
        );
        info!(
            pollers = pollers.len(),
            alert_budget_ms = alert_budget.as_millis() as u64,
            "Main controller configured"
        );
        let shared = ControllerShared {
            heartbeat: Guarded::new("controller_heartbeat", ctx.clock.now(), timeout),
            overlay: Guarded::new("controller_overlay", OverlayState::default(), timeout),
            mail_sending_disabled: AtomicBool::new(config.mail_sending_disabled),
            operations: Mutex::new(()),
            alert_budget,
            config,
            ctx,
            pollers,
            countdown,
        };
        Self {
            shared: Arc::new(shared),
            thread: Mutex::new(None),
        }
    }

    /// Build every enabled family with its items, plus the countdown.
    pub fn from_config(config: &WardenConfig, ctx: Arc<WardenContext>, mut items: FleetItems) -> Self {
        let mut pollers: Vec<Arc<dyn Supervised>> = Vec::new();
        for (profile, (section, poller_config)) in DeviceProfile::ALL.iter().zip(config.pollers()) {
            let family = items.take(profile.device);
            if !poller_config.enabled {
                if !family.is_empty() {
                    warn!(poller = section, "Disabled, {} items ignored", family.len());
                }
                continue;
            }
            pollers.push(Arc::new(profile.build(poller_config, Arc::clone(&ctx), family)));
        }
        if config.countdown.blocks_arming(ctx.clock.utc_now()) {
            warn!(
                t0 = ?config.countdown.t0,
                "Countdown has no future T0, arming is refused until a new T0 is set"
            );
        }
        let countdown = config.countdown.enabled.then(|| {
            Arc::new(CountdownPoller::from_config(
                &config.countdown,
                &config.mail,
                Arc::clone(&ctx),
            ))
        });
        Self::new(config.controller.clone(), ctx, pollers, countdown)
    }

    #[inline]
    pub fn pollers(&self) -> &[Arc<dyn Supervised>] {
        &self.shared.pollers
    }

    pub fn countdown(&self) -> Option<&Arc<CountdownPoller>> {
        self.shared.countdown.as_ref()
    }

    pub fn status(&self) -> ControllerStatus {
        self.shared.ctx.store.current()
    }

    pub fn poller_views(&self) -> Vec<PollerView> {
        self.shared.pollers.iter().map(|p| p.view()).collect()
    }

    /// Every poller passes its arming gate. False for an empty fleet.
    pub fn can_be_armed(&self) -> bool {
        !self.shared.pollers.is_empty() && self.shared.pollers.iter().all(|p| p.can_be_armed())
    }

    pub fn has_shut_down(&self) -> bool {
        self.shared.ctx.signals.has_shut_down()
    }

    pub fn mail_sending_possible(&self) -> bool {
        self.shared.ctx.signals.mail_sending_possible()
    }

    pub fn set_mail_sending_disabled(&self, disabled: bool) {
        self.shared
            .mail_sending_disabled
            .store(disabled, Ordering::SeqCst);
        info!(disabled, "Mail sending switch changed");
    }

    pub fn is_unresponsive(&self) -> bool {
        self.shared.is_unresponsive()
    }

    /// Run one controller iteration on the calling thread.
    pub fn run_iteration(&self) -> WardenResult<()> {
        self.shared.run_iteration()
    }

    // ─── Countdown passthrough ──────────────────────────────────────

    /// Submit a new T0. `Ok(false)` without a countdown.
    pub fn reset_t0_to_utc(&self, t0: DateTime<Utc>) -> WardenResult<bool> {
        match &self.shared.countdown {
            Some(countdown) => countdown.reset_t0_to_utc(t0).map(|()| true),
            None => {
                warn!("No countdown configured, T0 ignored");
                Ok(false)
            }
        }
    }

    pub fn countdown_snapshot(&self) -> Option<CountdownSnapshot> {
        self.shared.countdown.as_ref().and_then(|c| c.snapshot())
    }

    // ─── Fan-out operations ─────────────────────────────────────────

    pub fn arm_panic_mode(&self) -> bool {
        self.shared.fan_out(Transition::Arm, None, |_, overlay| {
            overlay.prior = None;
            Some(ControllerStatus::Armed)
        })
    }

    pub fn disarm_panic_mode(&self) -> bool {
        self.shared.fan_out(Transition::Disarm, None, |_, overlay| {
            *overlay = OverlayState::default();
            Some(ControllerStatus::Monitoring)
        })
    }

    pub fn enter_hold_back_mode(&self) -> bool {
        self.shared.fan_out(Transition::Holdback, None, |_, _| {
            Some(ControllerStatus::Holdback)
        })
    }

    pub fn start_monitoring(&self) -> bool {
        self.shared.fan_out(Transition::StartMonitoring, None, |_, _| {
            Some(ControllerStatus::Monitoring)
        })
    }

    /// With `what_if` only the dry run is performed.
    pub fn stop_monitoring(&self, what_if: bool) -> bool {
        if what_if {
            let _op = self.shared.operations.lock();
            return fanout::dry_run(&self.shared.pollers, Transition::StopMonitoring).is_empty();
        }
        self.shared.fan_out(Transition::StopMonitoring, None, |_, overlay| {
            *overlay = OverlayState::default();
            Some(ControllerStatus::Stopped)
        })
    }

    /// Safe mode across the fleet. Remote-file writers join only when
    /// `include_remote_files` is set.
    pub fn enter_safe_mode(&self, include_remote_files: bool) -> bool {
        self.shared.enter_safe_mode(include_remote_files)
    }

    /// Clear panic state on every poller and the recorded panic history.
    pub fn reset_panic(&self) -> bool {
        let mut changed = false;
        for poller in &self.shared.pollers {
            changed |= poller.reset_panic();
        }
        self.shared.ctx.store.clear_panics();
        info!(changed, "Panics reset");
        changed
    }

    // ─── Threads ────────────────────────────────────────────────────

    /// Start every poller thread, then the controller loop.
    ///
    /// A poller that fails to start is logged and skipped. `Ok(false)`
    /// reports that not every poller started.
    pub fn start(&self) -> WardenResult<bool> {
        let mut slot = self.thread.lock();
        if slot.is_some() {
            return Err(WardenError::AlreadyStarted {
                poller: OWNER.to_string(),
            });
        }

        let mut all_started = true;
        let mut any_started = false;
        for poller in &self.shared.pollers {
            match poller.start_polling_thread() {
                Ok(true) => any_started = true,
                Ok(false) => {
                    all_started = false;
                    warn!(poller = poller.name(), "Poller did not start");
                }
                Err(e) => {
                    all_started = false;
                    error!(poller = poller.name(), "Poller failed to start: {}", e);
                }
            }
        }
        if any_started {
            self.shared.push_status(ControllerStatus::Monitoring);
        }

        self.shared.heartbeat.set(self.shared.ctx.clock.now())?;
        let shared = Arc::clone(&self.shared);
        *slot = Some(LoopThread::spawn(THREAD_NAME.to_string(), OWNER, move |cancel| {
            shared.run_loop(cancel)
        })?);
        if !all_started {
            warn!("Not every poller started");
        }
        Ok(all_started)
    }

    /// Stop the controller loop, then every poller thread.
    ///
    /// Every poller is attempted even when an earlier one fails. The first
    /// stop timeout is returned after the sweep.
    pub fn stop(&self) -> WardenResult<bool> {
        let mut first_error: Option<WardenError> = None;
        if let Some(thread) = self.thread.lock().take() {
            let wait = self.shared.config.sleep_interval().saturating_mul(2);
            if let Err(e) = thread.shutdown(OWNER, wait) {
                first_error = Some(e);
            }
        }

        let mut all_stopped = true;
        for poller in &self.shared.pollers {
            match poller.stop_polling_thread() {
                Ok(true) => {}
                Ok(false) => {
                    all_stopped = false;
                    warn!(poller = poller.name(), "Poller was not monitoring");
                }
                Err(e) => {
                    all_stopped = false;
                    error!(poller = poller.name(), "Poller failed to stop: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if self.status() != ControllerStatus::Stopped {
            self.shared.push_status(ControllerStatus::Stopped);
        }
        if let Ok(mut overlay) = self.shared.overlay.lock() {
            *overlay = OverlayState::default();
        }
        if !all_stopped {
            warn!("Not every poller stopped cleanly");
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(all_stopped),
        }
    }
}

impl Drop for MainController {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.get_mut().take() {
            let wait = self.shared.config.sleep_interval().saturating_mul(2);
            if let Err(e) = thread.shutdown(OWNER, wait) {
                error!("{}", e);
            }
        }
    }
}

impl ControllerShared {
    fn push_status(&self, status: ControllerStatus) {
        self.ctx.store.push(status, self.ctx.clock.utc_now());
    }

    fn is_unresponsive(&self) -> bool {
        match self.heartbeat.get() {
            Ok(beat) => self.ctx.clock.now().saturating_duration_since(beat) > self.alert_budget,
            Err(_) => true,
        }
    }

    fn touch_heartbeat(&self) -> WardenResult<()> {
        Ok(self.heartbeat.set(self.ctx.clock.now())?)
    }

    /// Run `op` on `participants` with two-phase semantics, then let
    /// `next_status` decide the new controller status when the fleet moved.
    fn fan_out_on(
        &self,
        participants: &[Arc<dyn Supervised>],
        op: Transition,
        next_status: impl FnOnce(ControllerStatus, &mut OverlayState) -> Option<ControllerStatus>,
    ) -> bool {
        let _op = self.operations.lock();
        let outcome = fanout::two_phase(participants, op);
        if outcome.fleet_moved() {
            let current = self.ctx.store.current();
            let next = self.overlay.update(|overlay| next_status(current, overlay));
            match next {
                Ok(Some(next)) if next != current => self.push_status(next),
                Ok(_) => debug!(%op, %current, "Controller status unchanged"),
                Err(e) => error!(%op, "Controller status not updated: {}", e),
            }
        }
        match &outcome {
            FanoutOutcome::Committed(_) => info!(%op, "Fan-out committed"),
            FanoutOutcome::Vacuous => {}
            FanoutOutcome::Refused(refused) => {
                warn!(%op, ?refused, "Cannot {}", op);
            }
            FanoutOutcome::Partial {
                committed,
                failed,
                moved,
                rolled_back,
            } => {
                error!(%op, committed, ?failed, moved, rolled_back, "Fan-out failed part-way");
            }
        }
        outcome.succeeded()
    }

    fn fan_out(
        &self,
        op: Transition,
        participants: Option<&[Arc<dyn Supervised>]>,
        next_status: impl FnOnce(ControllerStatus, &mut OverlayState) -> Option<ControllerStatus>,
    ) -> bool {
        self.fan_out_on(participants.unwrap_or(self.pollers.as_slice()), op, next_status)
    }

    fn enter_safe_mode(&self, include_remote_files: bool) -> bool {
        let participants: Vec<Arc<dyn Supervised>> = self
            .pollers
            .iter()
            .filter(|p| {
                include_remote_files
                    || !DeviceProfile::for_device(p.device_type()).is_some_and(|d| d.remote_files)
            })
            .cloned()
            .collect();
        self.fan_out(Transition::SafeMode, Some(&participants), |current, overlay| {
            match current {
                // overlay keeps priority, restore into safe mode later
                ControllerStatus::ShutDown => {
                    overlay.prior = Some(ControllerStatus::SafeMode);
                    None
                }
                ControllerStatus::Triggered => None,
                _ => Some(ControllerStatus::SafeMode),
            }
        })
    }

    fn run_loop(&self, cancel: CancellationToken) {
        info!("Controller loop started");
        while !cancel.is_cancelled() {
            let result = panic::catch_unwind(AssertUnwindSafe(|| self.run_iteration()))
                .unwrap_or_else(|payload| {
                    Err(WardenError::LoopPanicked {
                        poller: OWNER.to_string(),
                        details: panic_message(payload.as_ref()),
                    })
                });
            match result {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => break,
                Err(e) => {
                    error!("Controller iteration failed: {}", e);
                    if self.ctx.store.current().is_armed_or_above() {
                        self.ctx
                            .fire(DeviceType::MainController, OWNER, PanicReason::GeneralError);
                    }
                }
            }
            if cancel.sleep(self.config.sleep_interval()) {
                break;
            }
        }
        info!("Controller loop exited");
    }

    fn run_iteration(&self) -> WardenResult<()> {
        self.touch_heartbeat()?;

        if self.ctx.store.safe_mode_requested() {
            self.ctx.store.enter_safe_mode(false);
            warn!("Global safe mode requested");
            if !self.enter_safe_mode(true) {
                warn!("Not every poller entered safe mode");
            }
        }

        let status = self.ctx.store.current();
        if status.is_armed_or_above() {
            for poller in &self.pollers {
                if poller.is_poller_unresponsive() {
                    let source = format!("poller:{}", poller.name());
                    error!(poller = poller.name(), budget = ?poller.alert_budget(), "Poller unresponsive");
                    self.ctx
                        .fire(poller.device_type(), &source, PanicReason::Unresponsive);
                }
            }
        }
        self.touch_heartbeat()?;

        let any_shut_down = self.pollers.iter().any(|p| p.has_shut_down());
        let verified = self.pollers.iter().any(|p| {
            matches!(p.status(), Ok(PollerStatus::SafeMode)) && p.has_shut_down_verified()
        });
        let t0_fired = self
            .countdown
            .as_ref()
            .is_some_and(|c| c.t0_trigger_fired());
        let now = self.ctx.clock.utc_now();

        // an operator fan-out may have committed while pollers were sampled
        let overlay = {
            let _op = self.operations.lock();
            let current = self.ctx.store.current();
            if current != status {
                debug!(%status, %current, "Controller status changed during sampling");
            }
            let (next, overlay) = self.overlay.update(|overlay| {
                let next = next_overlay_status(current, any_shut_down, t0_fired, overlay);
                overlay.shut_down_since = if next.is_shut_down() {
                    Some(overlay.shut_down_since.unwrap_or(now))
                } else {
                    None
                };
                (next, overlay.clone())
            })?;
            if next != current {
                self.push_status(next);
            }
            overlay
        };

        let mail = self.mail_gate(overlay.shut_down_since, now);
        self.ctx
            .signals
            .publish(overlay.has_shut_down, verified, mail);
        Ok(())
    }

    /// Not disabled, no live higher-priority peer, and shut down long enough.
    fn mail_gate(&self, shut_down_since: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        if self.mail_sending_disabled.load(Ordering::SeqCst) {
            return false;
        }
        let own = self.config.mail_priority;
        let peer_first = self
            .pollers
            .iter()
            .filter(|p| p.device_type() == DeviceType::WatcherFileRead)
            .any(|p| p.has_live_higher_priority_item(own));
        if peer_first {
            return false;
        }
        let min = ChronoDuration::minutes(i64::from(self.config.min_minutes_since_shutdown_for_mail));
        shut_down_since.is_some_and(|since| now - since >= min)
    }
}

/// ShutDown/Triggered overlay transitions plus `has_shut_down` hysteresis.
fn next_overlay_status(
    status: ControllerStatus,
    any_shut_down: bool,
    t0_fired: bool,
    overlay: &mut OverlayState,
) -> ControllerStatus {
    use ControllerStatus::*;

    let mut next = status;
    if any_shut_down && matches!(status, Armed | SafeMode) {
        overlay.prior = Some(status);
        next = ShutDown;
    } else if !any_shut_down && status == ShutDown {
        next = overlay.prior.take().unwrap_or(Armed);
    }
    if t0_fired && next.is_armed_or_above() && next != Triggered {
        next = Triggered;
    }

    if any_shut_down && status.is_armed_or_above() {
        overlay.has_shut_down = true;
    } else if !next.is_shut_down() {
        overlay.has_shut_down = false;
    }
    next
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ControllerStatus::*;

    #[test]
    fn shut_down_overlay_restores_prior() {
        let mut overlay = OverlayState::default();
        assert_eq!(next_overlay_status(SafeMode, true, false, &mut overlay), ShutDown);
        assert!(overlay.has_shut_down);
        assert_eq!(next_overlay_status(ShutDown, false, false, &mut overlay), SafeMode);
        assert!(!overlay.has_shut_down);
    }

    #[test]
    fn triggered_is_sticky() {
        let mut overlay = OverlayState::default();
        assert_eq!(next_overlay_status(Armed, true, true, &mut overlay), Triggered);
        assert_eq!(next_overlay_status(Triggered, false, true, &mut overlay), Triggered);
        assert!(overlay.has_shut_down);
        assert_eq!(next_overlay_status(Triggered, false, false, &mut overlay), Triggered);
        assert!(overlay.has_shut_down);
    }

    #[test]
    fn shut_down_ignored_below_armed() {
        let mut overlay = OverlayState::default();
        assert_eq!(next_overlay_status(Monitoring, true, false, &mut overlay), Monitoring);
        assert!(!overlay.has_shut_down);
        assert_eq!(next_overlay_status(Holdback, true, true, &mut overlay), Holdback);
    }
}
