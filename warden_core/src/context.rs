//! Shared collaborators.
//!
//! Every poller and the controller hold one `Arc<WardenContext>`. It carries
//! the time source, the status store, the shutdown trigger and the mail
//! sender, plus the signals the controller publishes for the countdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use warden_common::clock::{Clock, SystemClock};
use warden_common::mail::MailSender;
use warden_common::panic::{DeviceType, PanicReason};
use warden_common::store::{PanicRecord, StatusStore};
use warden_common::trigger::{ShutdownTrigger, TriggerRecord};

/// Flags written by the main controller once per iteration.
#[derive(Debug, Default)]
pub struct ControllerSignals {
    has_shut_down: AtomicBool,
    has_shut_down_verified: AtomicBool,
    mail_sending_possible: AtomicBool,
}

impl ControllerSignals {
    #[inline]
    pub fn has_shut_down(&self) -> bool {
        self.has_shut_down.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn has_shut_down_verified(&self) -> bool {
        self.has_shut_down_verified.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn mail_sending_possible(&self) -> bool {
        self.mail_sending_possible.load(Ordering::SeqCst)
    }

    pub fn publish(&self, has_shut_down: bool, verified: bool, mail_sending_possible: bool) {
        self.has_shut_down.store(has_shut_down, Ordering::SeqCst);
        self.has_shut_down_verified.store(verified, Ordering::SeqCst);
        self.mail_sending_possible
            .store(mail_sending_possible, Ordering::SeqCst);
    }
}

pub struct WardenContext {
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn StatusStore>,
    pub trigger: Arc<dyn ShutdownTrigger>,
    pub mail: Arc<dyn MailSender>,
    pub signals: ControllerSignals,
}

impl WardenContext {
    pub fn new(
        clock: Arc<dyn Clock>,
        store: Arc<dyn StatusStore>,
        trigger: Arc<dyn ShutdownTrigger>,
        mail: Arc<dyn MailSender>,
    ) -> Arc<Self> {
        Arc::new(Self {
            clock,
            store,
            trigger,
            mail,
            signals: ControllerSignals::default(),
        })
    }

    /// Context on the wall clock.
    pub fn with_system_clock(
        store: Arc<dyn StatusStore>,
        trigger: Arc<dyn ShutdownTrigger>,
        mail: Arc<dyn MailSender>,
    ) -> Arc<Self> {
        Self::new(Arc::new(SystemClock), store, trigger, mail)
    }

    /// Record the panic in the store and fire the shutdown trigger.
    pub fn fire(&self, device: DeviceType, source_id: &str, reason: PanicReason) {
        let record = TriggerRecord::new(self.clock.utc_now(), device, source_id, reason);
        self.store.record_panic(PanicRecord {
            at: record.at,
            device,
            source_id: record.source_id.clone(),
            reason,
        });
        self.trigger.trigger_shut_down(&record);
    }
}

static_assertions::assert_impl_all!(WardenContext: Send, Sync);
