//! Shared fixtures for warden_core integration tests.
#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use warden_common::cancel::CancellationToken;
use warden_common::clock::ManualClock;
use warden_common::config::{PollerConfig, RetryPolicy};
use warden_common::error::ItemError;
use warden_common::item::{ItemModeState, MonitoredItem};
use warden_common::mail::SimulatedMailSender;
use warden_common::panic::{ItemPanic, SwitchPanic};
use warden_common::store::InMemoryStatusStore;
use warden_common::trigger::RecordingTrigger;
use warden_core::context::WardenContext;
use warden_core::devices::DeviceProfile;
use warden_core::poller::ItemPoller;

/// Knobs and observations shared between a test and its item.
#[derive(Debug, Default)]
pub struct ItemControl {
    pub panic: AtomicBool,
    pub shut_down: AtomicBool,
    pub hold_back: AtomicBool,
    pub fail_check: AtomicBool,
    pub unwind: AtomicBool,
    /// `check` blocks for [`STALL`] and ignores cancellation.
    pub stall: AtomicBool,
    pub stalled: AtomicBool,
    pub refuse_arm: AtomicBool,
    pub fail_commit: AtomicBool,
    pub live: AtomicBool,
    pub mail_priority: Mutex<Option<u32>>,
    pub checks: AtomicUsize,
    pub armed: AtomicBool,
    pub safe_mode: AtomicBool,
    pub token_attached: AtomicBool,
}

pub const STALL: Duration = Duration::from_secs(1);

pub fn set(flag: &AtomicBool, value: bool) {
    flag.store(value, Ordering::SeqCst);
}

pub fn get(flag: &AtomicBool) -> bool {
    flag.load(Ordering::SeqCst)
}

pub struct TestItem {
    id: String,
    control: Arc<ItemControl>,
    mode: ItemModeState,
}

pub fn item(id: &str) -> (TestItem, Arc<ItemControl>) {
    let control = Arc::new(ItemControl::default());
    (
        TestItem {
            id: id.to_string(),
            control: Arc::clone(&control),
            mode: ItemModeState::default(),
        },
        control,
    )
}

impl TestItem {
    fn mirror(&self, ok: bool) -> bool {
        set(&self.control.armed, self.mode.armed);
        set(&self.control.safe_mode, self.mode.safe_mode);
        ok && !get(&self.control.fail_commit)
    }
}

impl MonitoredItem for TestItem {
    fn id(&self) -> &str {
        &self.id
    }

    fn check(&mut self) -> Result<bool, ItemError> {
        self.control.checks.fetch_add(1, Ordering::SeqCst);
        self.mode.check_cancelled()?;
        if get(&self.control.unwind) {
            panic!("simulated driver bug in {}", self.id);
        }
        if get(&self.control.stall) {
            set(&self.control.stalled, true);
            std::thread::sleep(STALL);
        }
        if get(&self.control.fail_check) {
            return Err(ItemError::Device("no answer".into()));
        }
        let panicked = get(&self.control.panic);
        self.mode.panic = if panicked {
            ItemPanic::Switch(SwitchPanic::Unreachable)
        } else {
            ItemPanic::None
        };
        Ok(panicked)
    }

    fn has_shut_down(&self) -> bool {
        get(&self.control.shut_down)
    }

    fn hold_back(&self) -> bool {
        self.mode.hold_back || get(&self.control.hold_back)
    }

    fn panic(&self) -> ItemPanic {
        self.mode.panic
    }

    fn can_be_armed(&self) -> bool {
        !get(&self.control.refuse_arm)
    }

    fn arm_panic_mode(&mut self) -> bool {
        let ok = self.mode.arm();
        self.mirror(ok)
    }

    fn disarm_panic_mode(&mut self) -> bool {
        let ok = self.mode.disarm();
        self.mirror(ok)
    }

    fn enter_safe_mode(&mut self) -> bool {
        let ok = self.mode.enter_safe_mode();
        self.mirror(ok)
    }

    fn enter_hold_back_mode(&mut self) -> bool {
        let ok = self.mode.enter_hold_back();
        self.mirror(ok)
    }

    fn start_monitoring(&mut self) -> bool {
        let ok = self.mode.start();
        self.mirror(ok)
    }

    fn stop_monitoring(&mut self) -> bool {
        let ok = self.mode.stop();
        self.mirror(ok)
    }

    fn reset_panic(&mut self) -> bool {
        self.mode.reset_panic()
    }

    fn set_cancellation_token(&mut self, token: CancellationToken) {
        self.mode.token = Some(token);
        set(&self.control.token_attached, true);
    }

    fn remove_cancellation_token(&mut self) {
        self.mode.token = None;
        set(&self.control.token_attached, false);
    }

    fn mail_priority(&self) -> Option<u32> {
        *self.control.mail_priority.lock()
    }

    fn is_live(&self) -> bool {
        get(&self.control.live)
    }
}

pub fn t_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 11, 1, 5, 0, 0).unwrap()
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<InMemoryStatusStore>,
    pub trigger: Arc<RecordingTrigger>,
    pub mail: Arc<SimulatedMailSender>,
    pub ctx: Arc<WardenContext>,
}

impl Harness {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::starting_at(t_start()));
        let store = Arc::new(InMemoryStatusStore::new());
        let trigger = Arc::new(RecordingTrigger::new());
        let mail = Arc::new(SimulatedMailSender::new());
        let ctx = WardenContext::new(clock.clone(), store.clone(), trigger.clone(), mail.clone());
        Self {
            clock,
            store,
            trigger,
            mail,
            ctx,
        }
    }

    pub fn poller(
        &self,
        profile: DeviceProfile,
        config: &PollerConfig,
        items: Vec<TestItem>,
    ) -> ItemPoller<TestItem> {
        profile.build(config, Arc::clone(&self.ctx), items)
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }
}

/// Fast loop, short locks, single-attempt commands.
/// Alert budget: 30ms plus 6s per item.
pub fn fast_config(min_count: u64) -> PollerConfig {
    PollerConfig {
        sleep_interval_ms: 10,
        min_poller_count_to_arm: min_count,
        lock_timeout_ms: 200,
        shutdown_verify_ms: 1000,
        retry: RetryPolicy {
            retry_count: 0,
            retry_min_wait_ms: 0,
            retry_wait_span_ms: 0,
            timeout_ms: 5000,
        },
        ..PollerConfig::default()
    }
}

/// Poll `cond` for up to two seconds of wall time.
pub fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}
