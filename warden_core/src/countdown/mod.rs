//! Countdown poller.
//!
//! Has no item list. Each iteration evaluates, in order:
//! 1. safe mode at its deadline (or at T0 when there is none),
//! 2. the T0 trigger, once,
//! 3. shutdown verification after T0, re-queued while it fails,
//! 4. mail dispatch behind a double-checked controller gate.
//!
//! A T0 submitted through [`CountdownPoller::reset_t0_to_utc`] replaces all
//! deadlines and flags at the start of the next iteration.

pub mod data;

pub use data::{CountdownData, Deadline};

use crate::budget;
use crate::context::{ControllerSignals, WardenContext};
use crate::poller::{CoreSettings, PollWork, Poller, PollerCore};
use crate::transition::Transition;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};
use warden_common::cancel::CancellationToken;
use warden_common::config::{CountdownConfig, MailConfig};
use warden_common::error::{WardenError, WardenResult};
use warden_common::guarded::Guarded;
use warden_common::mail::MailKind;
use warden_common::panic::{DeviceType, PanicReason};
use warden_common::status::ControllerStatus;
use warden_common::store::CountdownSnapshot;

pub type CountdownPoller = Poller<CountdownWork>;

pub struct CountdownWork {
    config: CountdownConfig,
    mail: MailConfig,
    data: Guarded<Option<CountdownData>>,
    pending_t0: Guarded<Option<DateTime<Utc>>>,
    sending_mail: AtomicBool,
}

impl CountdownWork {
    pub fn new(config: CountdownConfig, mail: MailConfig) -> Self {
        let timeout = config.lock_timeout();
        let data = config.t0.map(|t0| CountdownData::new(t0, &config));
        Self {
            data: Guarded::new("countdown", data, timeout),
            pending_t0: Guarded::new("pending_t0", None, timeout),
            sending_mail: AtomicBool::new(false),
            config,
            mail,
        }
    }

    /// Rules 1 to 3. Returns whether the mail deadline passed the first gate check.
    fn evaluate(&self, core: &PollerCore, data: &mut CountdownData, now: DateTime<Utc>) -> bool {
        let ctx = core.ctx();
        let controller = ctx.store.current();

        if matches!(
            controller,
            ControllerStatus::Armed | ControllerStatus::ShutDown | ControllerStatus::Triggered
        ) && !data.safe_mode_triggered
            && data.safe_mode_due(now)
        {
            warn!(%controller, "Countdown entering safe mode");
            core.commit_status(Transition::SafeMode);
            ctx.store.enter_safe_mode(true);
            data.mark_safe_mode_triggered();
        }

        if data.t0.is_due(now) && !data.t0.triggered() && controller.is_armed_or_above() {
            data.t0.mark_reached();
            if self.config.trigger_on_t0 {
                error!(t0 = %data.t0.at, "T0 reached, triggering shutdown");
                ctx.fire(DeviceType::Countdown, "T0", PanicReason::NoPanic);
            } else {
                info!(t0 = %data.t0.at, "T0 reached");
            }
            data.t0.mark_triggered();
        }

        let check_due = data
            .check_shut_down
            .is_some_and(|d| d.is_due(now) && !d.triggered());
        if data.t0.reached() && check_due {
            if controller.is_shut_down() && ctx.signals.has_shut_down_verified() {
                info!("Shutdown verified");
                if let Some(check) = data.check_shut_down.as_mut() {
                    check.mark_triggered();
                }
            } else {
                core.mark_panicked();
                let next = data.requeue_check(now);
                error!(%controller, next_check = ?next, "Shutdown not verified");
                ctx.fire(
                    DeviceType::Countdown,
                    "CheckShutDown",
                    PanicReason::CheckConditionViolation,
                );
            }
        }

        data.emails.is_some_and(|d| d.is_due(now) && !d.triggered())
            && ctx.signals.mail_sending_possible()
    }

    /// Rule 4 after the first gate check passed.
    fn dispatch_mail(
        &self,
        core: &PollerCore,
        cancel: &CancellationToken,
        t0: DateTime<Utc>,
    ) -> WardenResult<()> {
        let ctx = core.ctx();
        let _sending = SendingFlag::raise(&self.sending_mail);

        let delay = self.config.mail_recheck_delay();
        info!(?delay, "Mail deadline reached, re-checking gate");
        if cancel.sleep(delay) {
            return Err(WardenError::Cancelled);
        }
        core.touch_heartbeat()?;
        if !mail_gate_recheck(&ctx.signals) {
            warn!("Mail gate closed on re-check, postponing");
            return Ok(());
        }

        let emergency = ctx.mail.send(MailKind::Emergency, &self.mail.emergency, &self.mail);
        core.touch_heartbeat()?;
        let info = ctx.mail.send(MailKind::Info, &self.mail.info, &self.mail);
        core.touch_heartbeat()?;

        let failed = emergency.iter().chain(&info).filter(|o| !o.sent).count();
        let sent = emergency.len() + info.len() - failed;

        let mut data = self.data.lock()?;
        match data.as_mut() {
            Some(current) if current.t0.at == t0 => {
                if let Some(emails) = current.emails.as_mut() {
                    emails.mark_triggered();
                }
                ctx.store.set_countdown_info(current.snapshot(ctx.clock.utc_now()));
            }
            _ => warn!("T0 replaced while mail was sending"),
        }
        if failed > 0 {
            warn!(sent, failed, "Mail dispatched with failures");
        } else {
            info!(sent, "Mail dispatched");
        }
        Ok(())
    }
}

/// Second, separately evaluated gate read before the irreversible send.
#[inline(never)]
fn mail_gate_recheck(signals: &ControllerSignals) -> bool {
    std::hint::black_box(signals.mail_sending_possible())
}

struct SendingFlag<'a>(&'a AtomicBool);

impl<'a> SendingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for SendingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl PollWork for CountdownWork {
    fn iterate(&self, core: &PollerCore, cancel: &CancellationToken) -> WardenResult<()> {
        core.checkpoint(cancel)?;
        let ctx = core.ctx();
        let now = ctx.clock.utc_now();

        if let Some(t0) = self.pending_t0.lock()?.take() {
            let fresh = CountdownData::new(t0, &self.config);
            info!(%t0, "T0 replaced, deadlines recomputed");
            ctx.store.set_countdown_info(fresh.snapshot(now));
            self.data.set(Some(fresh))?;
            return Ok(());
        }

        let mail = {
            let mut guard = self.data.lock()?;
            let Some(data) = guard.as_mut() else {
                return Ok(());
            };
            let mail_due = self.evaluate(core, data, now);
            ctx.store.set_countdown_info(data.snapshot(now));
            mail_due.then_some(data.t0.at)
        };

        if let Some(t0) = mail {
            core.checkpoint(cancel)?;
            self.dispatch_mail(core, cancel, t0)?;
        }
        Ok(())
    }

    fn can_be_armed(&self, core: &PollerCore) -> bool {
        let now = core.ctx().clock.utc_now();
        let pending = self.pending_t0.get().ok().flatten();
        let t0 = pending.or_else(|| {
            self.data
                .lock()
                .ok()
                .and_then(|data| data.as_ref().map(|d| d.t0.at))
        });
        match t0 {
            Some(t0) if now < t0 => true,
            Some(t0) => {
                warn!(%t0, "T0 already passed");
                false
            }
            None => {
                warn!("No T0 set");
                false
            }
        }
    }

    fn is_busy(&self) -> bool {
        self.sending_mail.load(Ordering::SeqCst)
    }
}

impl Poller<CountdownWork> {
    /// Build the countdown poller. The thread is not started.
    pub fn from_config(config: &CountdownConfig, mail: &MailConfig, ctx: Arc<WardenContext>) -> Self {
        let sleep = config.sleep_interval();
        let alert_budget = budget::itemless_budget(
            config.alert_time_ms.map(Duration::from_millis),
            sleep,
            config.lock_timeout(),
        );
        let settings = CoreSettings {
            sleep_interval: sleep,
            alert_budget,
            lock_timeout: config.lock_timeout(),
            min_poller_count_to_arm: config.min_poller_count_to_arm,
            auto_safe_mode: false,
            shutdown_verify: Duration::ZERO,
        };
        let core = PollerCore::new("countdown", DeviceType::Countdown, ctx, settings);
        Poller::new(core, CountdownWork::new(config.clone(), mail.clone()))
    }

    /// Submit a new T0. Applied atomically at the next iteration.
    pub fn reset_t0_to_utc(&self, t0: DateTime<Utc>) -> WardenResult<()> {
        self.work().pending_t0.set(Some(t0))?;
        info!(%t0, "New T0 submitted");
        Ok(())
    }

    pub fn snapshot(&self) -> Option<CountdownSnapshot> {
        let now = self.core().ctx().clock.utc_now();
        let data = self.work().data.lock().ok()?;
        data.as_ref().map(|d| d.snapshot(now))
    }

    /// T0 fired a shutdown trigger.
    pub fn t0_trigger_fired(&self) -> bool {
        self.work().config.trigger_on_t0
            && self
                .work()
                .data
                .lock()
                .is_ok_and(|data| data.as_ref().is_some_and(|d| d.t0.triggered()))
    }

    pub fn is_sending_mail(&self) -> bool {
        self.work().is_busy()
    }
}
