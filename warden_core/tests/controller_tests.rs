//! Main controller: fan-out protocol, ShutDown overlay, watchdog, mail gate.

mod common;

use common::{Harness, ItemControl, TestItem, fast_config, get, item, set};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use warden_common::config::{
    ControllerConfig, CountdownConfig, LogLevel, MailConfig, PollerConfig, SharedConfig,
    WardenConfig,
};
use warden_common::error::{WardenError, WardenResult};
use warden_common::item::MonitoredItem;
use warden_common::panic::{DeviceType, PanicReason};
use warden_common::store::StatusStore;
use warden_common::status::{ControllerStatus, PollerStatus};
use warden_core::controller::MainController;
use warden_core::countdown::CountdownPoller;
use warden_core::devices::{
    CLEWARE, DeviceProfile, FRITZ, FleetItems, WATCHER_FILE_READ, WATCHER_FILE_WRITE,
};
use warden_core::poller::{ItemPoller, Supervised};
use warden_core::transition::Transition;

fn controller_config() -> ControllerConfig {
    ControllerConfig {
        sleep_interval_ms: 10,
        lock_timeout_ms: 200,
        ..ControllerConfig::default()
    }
}

struct Member {
    poller: Arc<ItemPoller<TestItem>>,
    control: Arc<ItemControl>,
}

fn member(h: &Harness, profile: DeviceProfile, id: &str, config: &PollerConfig) -> Member {
    let (it, control) = item(id);
    Member {
        poller: Arc::new(h.poller(profile, config, vec![it])),
        control,
    }
}

fn fleet(members: &[&Member]) -> Vec<Arc<dyn Supervised>> {
    members
        .iter()
        .map(|m| Arc::clone(&m.poller) as Arc<dyn Supervised>)
        .collect()
}

fn controller(h: &Harness, config: ControllerConfig, members: &[&Member]) -> MainController {
    MainController::new(config, Arc::clone(&h.ctx), fleet(members), None)
}

fn iterate(members: &[&Member]) {
    for m in members {
        m.poller.run_iteration().unwrap();
    }
}

// ─── Fan-out ────────────────────────────────────────────────────────

#[test]
fn dry_run_refusal_changes_nothing() {
    let h = Harness::new();
    let a = member(&h, FRITZ, "plug-nas", &fast_config(0));
    let b = member(&h, CLEWARE, "usb-1", &fast_config(0));
    let c = controller(&h, controller_config(), &[&a, &b]);

    assert!(c.start_monitoring());
    assert_eq!(c.status(), ControllerStatus::Monitoring);
    let history = h.store.history().len();

    set(&b.control.refuse_arm, true);
    assert!(!c.can_be_armed());
    assert!(!c.arm_panic_mode());
    assert_eq!(a.poller.status().unwrap(), PollerStatus::Monitoring);
    assert!(!get(&a.control.armed));
    assert_eq!(h.store.history().len(), history);
}

#[test]
fn arm_and_disarm_whole_fleet() {
    let h = Harness::new();
    let a = member(&h, FRITZ, "plug-nas", &fast_config(0));
    let b = member(&h, CLEWARE, "usb-1", &fast_config(0));
    let c = controller(&h, controller_config(), &[&a, &b]);
    c.start_monitoring();

    assert!(c.can_be_armed());
    assert!(c.arm_panic_mode());
    assert_eq!(c.status(), ControllerStatus::Armed);
    assert!(get(&a.control.armed) && get(&b.control.armed));

    assert!(c.disarm_panic_mode());
    assert_eq!(c.status(), ControllerStatus::Monitoring);
    assert_eq!(b.poller.status().unwrap(), PollerStatus::Monitoring);
    assert!(!get(&b.control.armed));
}

#[test]
fn partial_commit_is_rolled_back() {
    let h = Harness::new();
    let a = member(&h, FRITZ, "plug-nas", &fast_config(0));
    let b = member(&h, CLEWARE, "usb-1", &fast_config(0));
    let c = controller(&h, controller_config(), &[&a, &b]);
    c.start_monitoring();

    // dry run passes, the item then fails to follow the commit
    set(&b.control.fail_commit, true);
    assert!(!c.arm_panic_mode());

    assert_eq!(a.poller.status().unwrap(), PollerStatus::Monitoring);
    assert_eq!(b.poller.status().unwrap(), PollerStatus::Monitoring);
    assert!(!get(&a.control.armed));
    assert_eq!(c.status(), ControllerStatus::Monitoring);
}

#[test]
fn partial_disarm_still_disarms_controller() {
    let h = Harness::new();
    let a = member(&h, FRITZ, "plug-nas", &fast_config(0));
    let b = member(&h, CLEWARE, "usb-1", &fast_config(0));
    let c = controller(&h, controller_config(), &[&a, &b]);
    c.start_monitoring();
    assert!(c.arm_panic_mode());

    // disarm has no rollback, the fleet stays disarmed
    set(&b.control.fail_commit, true);
    assert!(!c.disarm_panic_mode());
    assert_eq!(a.poller.status().unwrap(), PollerStatus::Monitoring);
    assert_eq!(b.poller.status().unwrap(), PollerStatus::Monitoring);
    assert_eq!(c.status(), ControllerStatus::Monitoring);

    // stale pollers no longer count against a disarmed controller
    h.advance(Duration::from_secs(60));
    c.run_iteration().unwrap();
    assert_eq!(h.trigger.count(), 0);
}

#[test]
fn lone_failed_disarm_follows_fleet() {
    let h = Harness::new();
    let b = member(&h, CLEWARE, "usb-1", &fast_config(0));
    let c = controller(&h, controller_config(), &[&b]);
    c.start_monitoring();
    assert!(c.arm_panic_mode());

    set(&b.control.fail_commit, true);
    assert!(!c.disarm_panic_mode());
    assert_eq!(b.poller.status().unwrap(), PollerStatus::Monitoring);
    assert_eq!(c.status(), ControllerStatus::Monitoring);
}

#[test]
fn empty_fleet_succeeds_vacuously() {
    let h = Harness::new();
    let c = controller(&h, controller_config(), &[]);
    assert!(c.start_monitoring());
    assert!(c.arm_panic_mode());
    assert!(c.enter_safe_mode(true));
    assert!(h.store.history().is_empty());
    assert!(!c.can_be_armed());
}

#[test]
fn stop_monitoring_what_if_is_dry() {
    let h = Harness::new();
    let a = member(&h, FRITZ, "plug-nas", &fast_config(0));
    let c = controller(&h, controller_config(), &[&a]);
    assert!(!c.stop_monitoring(true));

    c.start_monitoring();
    assert!(c.stop_monitoring(true));
    assert_eq!(a.poller.status().unwrap(), PollerStatus::Monitoring);
    assert!(c.stop_monitoring(false));
    assert_eq!(a.poller.status().unwrap(), PollerStatus::Stopped);
    assert_eq!(c.status(), ControllerStatus::Stopped);
}

#[test]
fn safe_mode_skips_remote_writers_unless_asked() {
    let h = Harness::new();
    let a = member(&h, FRITZ, "plug-nas", &fast_config(0));
    let w = member(&h, WATCHER_FILE_WRITE, "peer-b.alive", &fast_config(0));
    let c = controller(&h, controller_config(), &[&a, &w]);
    c.start_monitoring();
    c.arm_panic_mode();

    assert!(c.enter_safe_mode(false));
    assert_eq!(a.poller.status().unwrap(), PollerStatus::SafeMode);
    assert_eq!(w.poller.status().unwrap(), PollerStatus::Armed);
    assert_eq!(c.status(), ControllerStatus::SafeMode);

    assert!(c.enter_safe_mode(true));
    assert_eq!(w.poller.status().unwrap(), PollerStatus::SafeMode);
    assert!(get(&w.control.safe_mode));
}

#[test]
fn global_safe_mode_request_is_consumed() {
    let h = Harness::new();
    let a = member(&h, FRITZ, "plug-nas", &fast_config(0));
    let w = member(&h, WATCHER_FILE_WRITE, "peer-b.alive", &fast_config(0));
    let c = controller(&h, controller_config(), &[&a, &w]);
    c.start_monitoring();
    c.arm_panic_mode();

    h.store.enter_safe_mode(true);
    c.run_iteration().unwrap();
    assert!(!h.store.safe_mode_requested());
    assert_eq!(a.poller.status().unwrap(), PollerStatus::SafeMode);
    assert_eq!(w.poller.status().unwrap(), PollerStatus::SafeMode);
    assert_eq!(c.status(), ControllerStatus::SafeMode);
}

#[test]
fn reset_panic_clears_history() {
    let h = Harness::new();
    let a = member(&h, FRITZ, "plug-nas", &fast_config(0));
    let c = controller(&h, controller_config(), &[&a]);
    c.start_monitoring();

    set(&a.control.panic, true);
    iterate(&[&a]);
    assert_eq!(h.store.panics().len(), 1);

    set(&a.control.panic, false);
    assert!(c.reset_panic());
    assert!(h.store.panics().is_empty());
    assert!(!a.poller.has_panicked());
}

// ─── ShutDown overlay ───────────────────────────────────────────────

/// Forwards to a poller, but the first shut-down sample lets an operator
/// disarm the fleet from another thread before answering `true`.
struct DisarmWhileSampled {
    inner: Arc<ItemPoller<TestItem>>,
    operator: Mutex<Option<Arc<MainController>>>,
    disarmed: AtomicBool,
}

impl Supervised for DisarmWhileSampled {
    fn name(&self) -> &str {
        self.inner.name()
    }
    fn device_type(&self) -> DeviceType {
        self.inner.device_type()
    }
    fn start_polling_thread(&self) -> WardenResult<bool> {
        self.inner.start_polling_thread()
    }
    fn stop_polling_thread(&self) -> WardenResult<bool> {
        self.inner.stop_polling_thread()
    }
    fn is_running(&self) -> bool {
        self.inner.is_running()
    }
    fn apply(&self, op: Transition, what_if: bool) -> bool {
        self.inner.apply(op, what_if)
    }
    fn reset_panic(&self) -> bool {
        self.inner.reset_panic()
    }
    fn status(&self) -> WardenResult<PollerStatus> {
        self.inner.status()
    }
    fn poller_count(&self) -> WardenResult<u64> {
        self.inner.poller_count()
    }
    fn has_panicked(&self) -> bool {
        self.inner.has_panicked()
    }
    fn has_loop_panic(&self) -> bool {
        self.inner.has_loop_panic()
    }
    fn has_shut_down(&self) -> bool {
        let Some(operator) = self.operator.lock().take() else {
            return self.inner.has_shut_down();
        };
        let ok = std::thread::spawn(move || operator.disarm_panic_mode())
            .join()
            .unwrap();
        set(&self.disarmed, ok);
        true
    }
    fn has_shut_down_verified(&self) -> bool {
        self.inner.has_shut_down_verified()
    }
    fn can_be_armed(&self) -> bool {
        self.inner.can_be_armed()
    }
    fn is_poller_unresponsive(&self) -> bool {
        self.inner.is_poller_unresponsive()
    }
    fn alert_budget(&self) -> Duration {
        self.inner.alert_budget()
    }
    fn has_live_higher_priority_item(&self, own_priority: u32) -> bool {
        self.inner.has_live_higher_priority_item(own_priority)
    }
}

#[test]
fn disarm_during_sampling_wins_over_overlay() {
    let h = Harness::new();
    let a = member(&h, FRITZ, "plug-nas", &fast_config(0));
    let sampled = Arc::new(DisarmWhileSampled {
        inner: Arc::clone(&a.poller),
        operator: Mutex::new(None),
        disarmed: AtomicBool::new(false),
    });
    let c = Arc::new(MainController::new(
        controller_config(),
        Arc::clone(&h.ctx),
        vec![Arc::clone(&sampled) as Arc<dyn Supervised>],
        None,
    ));
    c.start_monitoring();
    assert!(c.arm_panic_mode());

    *sampled.operator.lock() = Some(Arc::clone(&c));
    c.run_iteration().unwrap();

    assert!(get(&sampled.disarmed));
    assert_eq!(a.poller.status().unwrap(), PollerStatus::Monitoring);
    assert_eq!(c.status(), ControllerStatus::Monitoring);
    assert!(!c.has_shut_down());
    let statuses: Vec<_> = h.store.history().into_iter().map(|e| e.status).collect();
    assert!(!statuses.contains(&ControllerStatus::ShutDown));

    // still disarmed: a stale poller fires nothing
    h.advance(Duration::from_secs(60));
    c.run_iteration().unwrap();
    assert_eq!(h.trigger.count(), 0);
}

#[test]
fn history_is_stamped_by_the_context_clock() {
    let h = Harness::new();
    let a = member(&h, FRITZ, "plug-nas", &fast_config(0));
    let c = controller(&h, controller_config(), &[&a]);
    c.start_monitoring();
    h.advance(Duration::from_secs(90));
    c.arm_panic_mode();

    let history = h.store.history();
    assert_eq!(history[0].at, common::t_start());
    assert_eq!(history[1].at - history[0].at, chrono::Duration::seconds(90));
}

#[test]
fn shut_down_overlay_follows_pollers() {
    let h = Harness::new();
    let a = member(&h, FRITZ, "plug-nas", &fast_config(0));
    let c = controller(&h, controller_config(), &[&a]);
    c.start_monitoring();
    c.arm_panic_mode();

    set(&a.control.shut_down, true);
    iterate(&[&a]);
    c.run_iteration().unwrap();
    assert_eq!(c.status(), ControllerStatus::ShutDown);
    assert!(c.has_shut_down());

    set(&a.control.shut_down, false);
    iterate(&[&a]);
    c.run_iteration().unwrap();
    assert_eq!(c.status(), ControllerStatus::Armed);
    assert!(!c.has_shut_down());
}

#[test]
fn shut_down_ignored_while_monitoring() {
    let h = Harness::new();
    let a = member(&h, FRITZ, "plug-nas", &fast_config(0));
    let c = controller(&h, controller_config(), &[&a]);
    c.start_monitoring();

    set(&a.control.shut_down, true);
    iterate(&[&a]);
    c.run_iteration().unwrap();
    assert_eq!(c.status(), ControllerStatus::Monitoring);
    assert!(!c.has_shut_down());
}

#[test]
fn triggered_holds_shut_down_flag() {
    let h = Harness::new();
    let a = member(&h, FRITZ, "plug-nas", &fast_config(0));
    let countdown_config = CountdownConfig {
        t0: Some(common::t_start() + chrono::Duration::minutes(1)),
        sleep_interval_ms: 10,
        lock_timeout_ms: 200,
        ..CountdownConfig::default()
    };
    let countdown = Arc::new(CountdownPoller::from_config(
        &countdown_config,
        &MailConfig::default(),
        Arc::clone(&h.ctx),
    ));
    let c = MainController::new(
        controller_config(),
        Arc::clone(&h.ctx),
        fleet(&[&a]),
        Some(Arc::clone(&countdown)),
    );
    assert_eq!(c.pollers().len(), 2);

    c.start_monitoring();
    countdown.run_iteration().unwrap();
    assert!(c.arm_panic_mode());

    h.advance(Duration::from_secs(61));
    iterate(&[&a]);
    countdown.run_iteration().unwrap();
    c.run_iteration().unwrap();
    assert_eq!(c.status(), ControllerStatus::Triggered);
    assert_eq!(a.poller.status().unwrap(), PollerStatus::SafeMode);

    set(&a.control.shut_down, true);
    iterate(&[&a]);
    c.run_iteration().unwrap();
    assert!(c.has_shut_down());

    // the poller's flag clears, Triggered keeps the controller's
    set(&a.control.shut_down, false);
    iterate(&[&a]);
    c.run_iteration().unwrap();
    assert_eq!(c.status(), ControllerStatus::Triggered);
    assert!(c.has_shut_down());
}

#[test]
fn verified_needs_reporting_poller_in_safe_mode() {
    let h = Harness::new();
    let a = member(&h, FRITZ, "plug-nas", &fast_config(0));
    let c = controller(&h, controller_config(), &[&a]);
    c.start_monitoring();
    c.arm_panic_mode();

    set(&a.control.shut_down, true);
    iterate(&[&a]);
    h.advance(Duration::from_secs(2));
    iterate(&[&a]);
    assert!(a.poller.has_shut_down_verified());
    c.run_iteration().unwrap();
    assert!(!h.ctx.signals.has_shut_down_verified());

    assert!(c.enter_safe_mode(true));
    c.run_iteration().unwrap();
    assert!(h.ctx.signals.has_shut_down_verified());
}

// ─── Watchdog ───────────────────────────────────────────────────────

#[test]
fn unresponsive_poller_fires_only_when_armed() {
    let h = Harness::new();
    let a = member(&h, FRITZ, "plug-nas", &fast_config(0));
    let c = controller(&h, controller_config(), &[&a]);
    c.start_monitoring();
    iterate(&[&a]);

    h.advance(Duration::from_secs(7));
    c.run_iteration().unwrap();
    assert_eq!(h.trigger.count(), 0);

    iterate(&[&a]);
    c.arm_panic_mode();
    h.advance(Duration::from_secs(7));
    c.run_iteration().unwrap();

    let records = h.trigger.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].device, DeviceType::Fritz);
    assert_eq!(records[0].source_id, "poller:fritz");
    assert_eq!(records[0].reason, PanicReason::Unresponsive);
}

// ─── Mail gate ──────────────────────────────────────────────────────

#[test]
fn mail_gate_needs_time_since_shutdown() {
    let h = Harness::new();
    let a = member(&h, FRITZ, "plug-nas", &fast_config(0));
    let config = ControllerConfig {
        min_minutes_since_shutdown_for_mail: 5,
        ..controller_config()
    };
    let c = controller(&h, config, &[&a]);
    c.start_monitoring();
    c.arm_panic_mode();
    c.run_iteration().unwrap();
    assert!(!c.mail_sending_possible());

    set(&a.control.shut_down, true);
    iterate(&[&a]);
    c.run_iteration().unwrap();
    assert!(!c.mail_sending_possible());

    h.advance(Duration::from_secs(5 * 60));
    iterate(&[&a]);
    c.run_iteration().unwrap();
    assert!(c.mail_sending_possible());

    c.set_mail_sending_disabled(true);
    c.run_iteration().unwrap();
    assert!(!c.mail_sending_possible());
}

#[test]
fn live_higher_priority_peer_blocks_mail() {
    let h = Harness::new();
    let a = member(&h, FRITZ, "plug-nas", &fast_config(0));
    let peer = member(&h, WATCHER_FILE_READ, "peer-a.alive", &fast_config(0));
    set(&peer.control.live, true);
    *peer.control.mail_priority.lock() = Some(5);

    let config = ControllerConfig {
        mail_priority: 3,
        ..controller_config()
    };
    let c = controller(&h, config, &[&a, &peer]);
    c.start_monitoring();
    c.arm_panic_mode();

    set(&a.control.shut_down, true);
    iterate(&[&a, &peer]);
    c.run_iteration().unwrap();
    assert_eq!(c.status(), ControllerStatus::ShutDown);
    assert!(!c.mail_sending_possible());

    set(&peer.control.live, false);
    c.run_iteration().unwrap();
    assert!(c.mail_sending_possible());
}

// ─── Threads ────────────────────────────────────────────────────────

#[test]
fn start_and_stop_whole_fleet() {
    let h = Harness::new();
    let slow = PollerConfig {
        sleep_interval_ms: 50,
        ..fast_config(0)
    };
    let a = member(&h, FRITZ, "plug-nas", &slow);
    let b = member(&h, CLEWARE, "usb-1", &slow);
    let config = ControllerConfig {
        sleep_interval_ms: 50,
        ..controller_config()
    };
    let c = controller(&h, config, &[&a, &b]);

    assert!(c.start().unwrap());
    assert_eq!(c.status(), ControllerStatus::Monitoring);
    assert!(a.poller.is_running() && b.poller.is_running());
    assert!(matches!(c.start(), Err(WardenError::AlreadyStarted { .. })));

    assert!(common::eventually(|| a.poller.poller_count().unwrap() > 0));
    assert!(c.stop().unwrap());
    assert_eq!(c.status(), ControllerStatus::Stopped);
    assert_eq!(a.poller.status().unwrap(), PollerStatus::Stopped);
    assert!(!b.poller.is_running());
}

// ─── Construction ───────────────────────────────────────────────────

#[test]
fn from_config_omits_disabled_families() {
    let h = Harness::new();
    let mut config = WardenConfig {
        shared: SharedConfig {
            log_level: LogLevel::Info,
            service_name: "warden-test".into(),
        },
        controller: ControllerConfig::default(),
        cleware: PollerConfig::default(),
        fritz: PollerConfig::default(),
        switchbot: PollerConfig::default(),
        watcher_read: PollerConfig::default(),
        watcher_write: PollerConfig::default(),
        countdown: CountdownConfig::default(),
        mail: MailConfig::default(),
    };
    config.switchbot.enabled = false;

    let (plug, _) = item("plug-nas");
    let (bot, _) = item("bot-1");
    let items = FleetItems::new()
        .with(DeviceType::Fritz, vec![Box::new(plug) as Box<dyn MonitoredItem>])
        .with(DeviceType::SwitchBot, vec![Box::new(bot) as Box<dyn MonitoredItem>]);

    let c = MainController::from_config(&config, Arc::clone(&h.ctx), items);
    let names: Vec<_> = c.pollers().iter().map(|p| p.name().to_string()).collect();
    assert_eq!(
        names,
        vec!["cleware", "fritz", "watcher_read", "watcher_write", "countdown"]
    );
    assert!(c.countdown().is_some());
    assert_eq!(c.poller_views().len(), 5);
}
