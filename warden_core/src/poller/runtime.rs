//! Loop thread and transition handling of a generic poller.

use super::{PollWork, PollerCore, Supervised};
use crate::transition::{Transition, TransitionResult};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use warden_common::cancel::{CancellationToken, Latch};
use warden_common::error::{WardenError, WardenResult};
use warden_common::panic::DeviceType;
use warden_common::status::PollerStatus;

pub(crate) struct Shared<W> {
    pub(crate) core: PollerCore,
    pub(crate) work: W,
}

/// Running loop thread.
pub(crate) struct LoopThread {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
    exited: Arc<Latch>,
}

impl LoopThread {
    /// Spawn `body` on a named thread. `exited` is set however the body ends.
    pub(crate) fn spawn<F>(thread_name: String, owner: &str, body: F) -> WardenResult<Self>
    where
        F: FnOnce(CancellationToken) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let exited = Arc::new(Latch::new());
        let handle = {
            let cancel = cancel.clone();
            let exited = Arc::clone(&exited);
            thread::Builder::new()
                .name(thread_name)
                .spawn(move || {
                    let _exit = ExitGuard(exited);
                    body(cancel);
                })
                .map_err(|source| WardenError::ThreadSpawn {
                    poller: owner.to_string(),
                    source,
                })?
        };
        Ok(Self {
            handle,
            cancel,
            exited,
        })
    }

    /// Cancel and wait for the thread to exit.
    pub(crate) fn shutdown(self, owner: &str, wait: Duration) -> WardenResult<()> {
        self.cancel.cancel();
        if !self.exited.wait_timeout(wait) {
            error!(poller = owner, "Loop thread did not exit within {:?}", wait);
            return Err(WardenError::StopTimeout {
                poller: owner.to_string(),
                waited_ms: wait.as_millis() as u64,
            });
        }
        if self.handle.join().is_err() {
            warn!(poller = owner, "Loop thread ended with a panic");
        }
        Ok(())
    }
}

struct ExitGuard(Arc<Latch>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.set();
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Generic poller: core bookkeeping plus family-specific work.
pub struct Poller<W: PollWork> {
    shared: Arc<Shared<W>>,
    thread: Mutex<Option<LoopThread>>,
}

impl<W: PollWork> Poller<W> {
    pub fn new(core: PollerCore, work: W) -> Self {
        Self {
            shared: Arc::new(Shared { core, work }),
            thread: Mutex::new(None),
        }
    }

    #[inline]
    pub fn core(&self) -> &PollerCore {
        &self.shared.core
    }

    #[inline]
    pub fn work(&self) -> &W {
        &self.shared.work
    }

    /// Run one loop iteration on the calling thread.
    ///
    /// Fault handling matches the loop thread: a non-cancellation error or
    /// an unwinding panic marks the loop as panicked.
    pub fn run_iteration(&self) -> WardenResult<()> {
        self.shared.poll_once(&CancellationToken::new())
    }
}

impl<W: PollWork> Shared<W> {
    fn poll_once(&self, cancel: &CancellationToken) -> WardenResult<()> {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.work.iterate(&self.core, cancel)))
            .unwrap_or_else(|payload| {
                Err(WardenError::LoopPanicked {
                    poller: self.core.name().to_string(),
                    details: panic_message(payload.as_ref()),
                })
            })
            .and_then(|()| {
                self.core.increment_count()?;
                Ok(())
            });
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                self.core.record_loop_fault(&e);
                Err(e)
            }
        }
    }

    fn run_loop(&self, cancel: CancellationToken) {
        let core = &self.core;
        info!(poller = core.name(), device = %core.device(), "Polling loop started");
        self.work.attach(&cancel);

        while !cancel.is_cancelled() && !core.has_loop_panic() {
            if self.poll_once(&cancel).is_err() {
                break;
            }
            if cancel.sleep(core.settings().sleep_interval) {
                break;
            }
        }

        self.work.detach();
        info!(poller = core.name(), "Polling loop exited");
    }

    fn can_be_armed(&self) -> bool {
        self.core.status_allows_arming() && self.work.can_be_armed(&self.core)
    }
}

impl<W: PollWork> Supervised for Poller<W> {
    fn name(&self) -> &str {
        self.core().name()
    }

    fn device_type(&self) -> DeviceType {
        self.core().device()
    }

    fn start_polling_thread(&self) -> WardenResult<bool> {
        let mut slot = self.thread.lock();
        if slot.is_some() {
            return Err(WardenError::AlreadyStarted {
                poller: self.name().to_string(),
            });
        }
        let status = self.core().status()?;
        if status != PollerStatus::Stopped {
            warn!(poller = self.name(), %status, "Cannot start polling thread");
            return Ok(false);
        }

        self.core().reset_progress()?;
        if !self.apply(Transition::StartMonitoring, false) {
            return Ok(false);
        }

        let shared = Arc::clone(&self.shared);
        let thread_name = format!("warden-{}", self.name());
        match LoopThread::spawn(thread_name, self.name(), move |cancel| shared.run_loop(cancel)) {
            Ok(thread) => {
                *slot = Some(thread);
                Ok(true)
            }
            Err(e) => {
                self.apply(Transition::StopMonitoring, false);
                Err(e)
            }
        }
    }

    fn stop_polling_thread(&self) -> WardenResult<bool> {
        let Some(thread) = self.thread.lock().take() else {
            return Ok(self.apply(Transition::StopMonitoring, false));
        };
        let stopped = self.apply(Transition::StopMonitoring, false);
        let wait = self.core().settings().sleep_interval.saturating_mul(2);
        thread.shutdown(self.name(), wait)?;
        Ok(stopped)
    }

    fn is_running(&self) -> bool {
        self.thread.lock().is_some()
    }

    fn apply(&self, op: Transition, what_if: bool) -> bool {
        let core = self.core();
        let from = match core.status() {
            Ok(s) => s,
            Err(e) => {
                warn!(poller = core.name(), %op, "Transition not attempted: {}", e);
                return false;
            }
        };
        let to = match op.apply(from) {
            TransitionResult::Ok(to) => to,
            TransitionResult::Rejected(why) => {
                warn!(poller = core.name(), %op, %from, "Transition refused: {}", why);
                return false;
            }
        };
        if op == Transition::Arm && !self.shared.can_be_armed() {
            warn!(poller = core.name(), "Not ready to arm");
            return false;
        }
        if what_if {
            return true;
        }
        if from == to {
            debug!(poller = core.name(), %op, "Already {}", to);
            return true;
        }

        match core.compare_and_set(from, to) {
            Ok(true) => {}
            Ok(false) => {
                warn!(poller = core.name(), %op, "Status changed concurrently");
                return false;
            }
            Err(_) => return false,
        }
        let members_ok = self.work().cascade(op);
        info!(poller = core.name(), "{} -> {} ({})", from, to, op);
        if !members_ok {
            warn!(poller = core.name(), %op, "Not every member followed");
        }
        members_ok
    }

    fn reset_panic(&self) -> bool {
        let flags = self.core().clear_panics();
        let members = self.work().reset_panic();
        if flags || members {
            info!(poller = self.name(), "Panic state reset");
        }
        flags || members
    }

    fn status(&self) -> WardenResult<PollerStatus> {
        Ok(self.core().status()?)
    }

    fn poller_count(&self) -> WardenResult<u64> {
        Ok(self.core().poller_count()?)
    }

    fn has_panicked(&self) -> bool {
        self.core().has_panicked()
    }

    fn has_loop_panic(&self) -> bool {
        self.core().has_loop_panic()
    }

    fn has_shut_down(&self) -> bool {
        self.core().has_shut_down()
    }

    fn has_shut_down_verified(&self) -> bool {
        self.core().has_shut_down_verified()
    }

    fn can_be_armed(&self) -> bool {
        self.shared.can_be_armed()
    }

    fn is_poller_unresponsive(&self) -> bool {
        !self.work().is_busy() && self.core().is_unresponsive()
    }

    fn alert_budget(&self) -> Duration {
        self.core().settings().alert_budget
    }

    fn has_live_higher_priority_item(&self, own_priority: u32) -> bool {
        self.work().has_live_higher_priority_item(own_priority)
    }
}

impl<W: PollWork> Drop for Poller<W> {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.get_mut().take() {
            thread.cancel.cancel();
        }
    }
}
