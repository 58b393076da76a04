//! File-driven simulated devices.
//!
//! Each item watches marker files in the simulation directory:
//!
//! - `<id>.panic`: the device reports its family's panic on the next check
//! - `<id>.off`: the device reports that it has shut down
//! - `<id>.alive`: peer liveness for read-watchers; the file content, if it
//!   parses as a number, is the peer's mail priority

use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use warden_common::cancel::CancellationToken;
use warden_common::error::ItemError;
use warden_common::item::{ItemModeState, MonitoredItem};
use warden_common::panic::{DeviceType, FilePanic, ItemPanic, SwitchPanic};

pub struct SimulatedItem {
    id: String,
    device: DeviceType,
    dir: PathBuf,
    mode: ItemModeState,
}

impl SimulatedItem {
    pub fn new(id: impl Into<String>, device: DeviceType, dir: impl AsRef<Path>) -> Self {
        Self {
            id: id.into(),
            device,
            dir: dir.as_ref().to_path_buf(),
            mode: ItemModeState::default(),
        }
    }

    fn marker(&self, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", self.id, suffix))
    }

    /// Panic a real device of this family would report.
    fn family_panic(&self) -> ItemPanic {
        match self.device {
            DeviceType::WatcherFileRead => ItemPanic::File(FilePanic::PeerPanicked),
            DeviceType::WatcherFileWrite => ItemPanic::File(FilePanic::WriteFailed),
            DeviceType::Cleware | DeviceType::Fritz | DeviceType::SwitchBot => {
                ItemPanic::Switch(SwitchPanic::Unreachable)
            }
            DeviceType::Countdown | DeviceType::MainController => ItemPanic::Fault,
        }
    }

    fn alive_priority(&self) -> Option<u32> {
        let content = std::fs::read_to_string(self.marker("alive")).ok()?;
        match content.trim().parse() {
            Ok(priority) => Some(priority),
            Err(_) => {
                warn!(item = %self.id, "Unparsable priority in alive marker");
                None
            }
        }
    }
}

impl MonitoredItem for SimulatedItem {
    fn id(&self) -> &str {
        &self.id
    }

    fn check(&mut self) -> Result<bool, ItemError> {
        self.mode.check_cancelled()?;
        let panicked = self.marker("panic").exists();
        self.mode.panic = if panicked {
            self.family_panic()
        } else {
            ItemPanic::None
        };
        debug!(item = %self.id, panicked, "Simulated check");
        Ok(panicked)
    }

    fn has_shut_down(&self) -> bool {
        self.marker("off").exists()
    }

    fn hold_back(&self) -> bool {
        self.mode.hold_back
    }

    fn panic(&self) -> ItemPanic {
        self.mode.panic
    }

    fn can_be_armed(&self) -> bool {
        !self.mode.panic.is_panic()
    }

    fn arm_panic_mode(&mut self) -> bool {
        self.mode.arm()
    }

    fn disarm_panic_mode(&mut self) -> bool {
        self.mode.disarm()
    }

    fn enter_safe_mode(&mut self) -> bool {
        self.mode.enter_safe_mode()
    }

    fn enter_hold_back_mode(&mut self) -> bool {
        self.mode.enter_hold_back()
    }

    fn start_monitoring(&mut self) -> bool {
        self.mode.start()
    }

    fn stop_monitoring(&mut self) -> bool {
        self.mode.stop()
    }

    fn reset_panic(&mut self) -> bool {
        self.mode.reset_panic()
    }

    fn set_cancellation_token(&mut self, token: CancellationToken) {
        self.mode.token = Some(token);
    }

    fn remove_cancellation_token(&mut self) {
        self.mode.token = None;
    }

    fn mail_priority(&self) -> Option<u32> {
        self.alive_priority()
    }

    fn is_live(&self) -> bool {
        self.marker("alive").exists()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
