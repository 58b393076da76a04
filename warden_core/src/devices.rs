//! Device-family profiles.
//!
//! Every family runs the same [`ItemWork`] loop. A profile only carries
//! what differs: which budget multipliers apply, whether items report peer
//! liveness for the mail gate, and whether the family writes remote files
//! (those join safe mode only on request).

use crate::budget;
use crate::context::WardenContext;
use crate::poller::{CoreSettings, ItemPoller, ItemWork, PollerCore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use warden_common::config::PollerConfig;
use warden_common::guarded::Guarded;
use warden_common::item::MonitoredItem;
use warden_common::panic::DeviceType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProfile {
    pub device: DeviceType,
    /// Configuration section and poller name.
    pub section: &'static str,
    /// Commands may need a fresh login first.
    pub uses_login: bool,
    /// Device names may need to be re-resolved first.
    pub uses_name_reload: bool,
    /// Items expose liveness and mail priority of a peer.
    pub reports_peer_liveness: bool,
    /// Items write files other hosts read.
    pub remote_files: bool,
}

/// USB switches. The vendor tool is a single command channel, so items are
/// never driven concurrently.
pub const CLEWARE: DeviceProfile = DeviceProfile {
    device: DeviceType::Cleware,
    section: "cleware",
    uses_login: false,
    uses_name_reload: false,
    reports_peer_liveness: false,
    remote_files: false,
};

pub const FRITZ: DeviceProfile = DeviceProfile {
    device: DeviceType::Fritz,
    section: "fritz",
    uses_login: true,
    uses_name_reload: false,
    reports_peer_liveness: false,
    remote_files: false,
};

pub const SWITCHBOT: DeviceProfile = DeviceProfile {
    device: DeviceType::SwitchBot,
    section: "switchbot",
    uses_login: true,
    uses_name_reload: true,
    reports_peer_liveness: false,
    remote_files: false,
};

pub const WATCHER_FILE_READ: DeviceProfile = DeviceProfile {
    device: DeviceType::WatcherFileRead,
    section: "watcher_read",
    uses_login: false,
    uses_name_reload: false,
    reports_peer_liveness: true,
    remote_files: false,
};

pub const WATCHER_FILE_WRITE: DeviceProfile = DeviceProfile {
    device: DeviceType::WatcherFileWrite,
    section: "watcher_write",
    uses_login: false,
    uses_name_reload: false,
    reports_peer_liveness: false,
    remote_files: true,
};

impl DeviceProfile {
    /// Item-driven families in fleet order.
    pub const ALL: [DeviceProfile; 5] = [
        CLEWARE,
        FRITZ,
        SWITCHBOT,
        WATCHER_FILE_READ,
        WATCHER_FILE_WRITE,
    ];

    pub fn for_device(device: DeviceType) -> Option<DeviceProfile> {
        Self::ALL.into_iter().find(|p| p.device == device)
    }

    /// `config` with multipliers this family never uses forced to one.
    fn effective(&self, config: &PollerConfig) -> PollerConfig {
        PollerConfig {
            login_factor: if self.uses_login { config.login_factor } else { 1 },
            name_reload_factor: if self.uses_name_reload {
                config.name_reload_factor
            } else {
                1
            },
            ..config.clone()
        }
    }

    pub fn item_worst_case(&self, config: &PollerConfig) -> Duration {
        let config = self.effective(config);
        budget::item_worst_case(&config.retry, config.login_factor, config.name_reload_factor)
    }

    pub fn alert_budget(&self, config: &PollerConfig, item_count: usize) -> Duration {
        budget::poller_budget(&self.effective(config), item_count)
    }

    /// Build the poller for this family. The thread is not started.
    pub fn build<I: MonitoredItem + 'static>(
        &self,
        config: &PollerConfig,
        ctx: Arc<WardenContext>,
        items: Vec<I>,
    ) -> ItemPoller<I> {
        let alert_budget = self.alert_budget(config, items.len());
        info!(
            poller = self.section,
            items = items.len(),
            alert_budget_ms = alert_budget.as_millis() as u64,
            "Poller configured"
        );
        let settings = CoreSettings::from_config(config, alert_budget);
        let core = PollerCore::new(self.section, self.device, ctx, settings);
        let work = ItemWork::new(*self, Guarded::new("items", items, alert_budget));
        ItemPoller::new(core, work)
    }
}

/// Monitored items per family, owned by the pollers once built.
#[derive(Default)]
pub struct FleetItems {
    items: HashMap<DeviceType, Vec<Box<dyn MonitoredItem>>>,
}

impl FleetItems {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, device: DeviceType, items: Vec<Box<dyn MonitoredItem>>) {
        self.items.entry(device).or_default().extend(items);
    }

    pub fn with(mut self, device: DeviceType, items: Vec<Box<dyn MonitoredItem>>) -> Self {
        self.insert(device, items);
        self
    }

    pub fn take(&mut self, device: DeviceType) -> Vec<Box<dyn MonitoredItem>> {
        self.items.remove(&device).unwrap_or_default()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use warden_common::config::RetryPolicy;

    fn config(login: u32, reload: u32) -> PollerConfig {
        PollerConfig {
            login_factor: login,
            name_reload_factor: reload,
            retry: RetryPolicy {
                retry_count: 0,
                retry_min_wait_ms: 0,
                retry_wait_span_ms: 0,
                timeout_ms: 2000,
            },
            ..PollerConfig::default()
        }
    }

    #[test]
    fn only_login_families_scale_with_login_factor() {
        let cfg = config(3, 1);
        assert_eq!(CLEWARE.item_worst_case(&cfg), Duration::from_secs(3));
        assert_eq!(FRITZ.item_worst_case(&cfg), Duration::from_secs(7));
        assert_eq!(SWITCHBOT.item_worst_case(&cfg), Duration::from_secs(7));
    }

    #[test]
    fn switchbot_also_scales_with_name_reload() {
        let cfg = config(2, 2);
        assert_eq!(FRITZ.item_worst_case(&cfg), Duration::from_secs(5));
        assert_eq!(SWITCHBOT.item_worst_case(&cfg), Duration::from_secs(9));
    }

    #[test]
    fn lookup_by_device() {
        assert_eq!(
            DeviceProfile::for_device(DeviceType::WatcherFileWrite),
            Some(WATCHER_FILE_WRITE)
        );
        assert_eq!(DeviceProfile::for_device(DeviceType::Countdown), None);
        assert!(WATCHER_FILE_WRITE.remote_files);
        assert!(WATCHER_FILE_READ.reports_peer_liveness);
    }
}
