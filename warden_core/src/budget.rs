//! Alert budget computation.
//!
//! A poller is unresponsive once its heartbeat is older than its alert
//! budget. The budget is either configured explicitly or derived from the
//! worst case of one full loop iteration.

use std::time::Duration;
use warden_common::config::{PollerConfig, RetryPolicy};

/// Fixed bookkeeping allowance per item on top of its command worst case.
pub const ITEM_OVERHEAD: Duration = Duration::from_secs(1);

/// Number of sleep intervals a healthy loop may spend between heartbeats.
pub const SLEEP_INTERVALS_PER_BUDGET: u32 = 3;

/// Worst-case duration of checking one item.
///
/// `login_factor` and `name_reload_factor` scale the command worst case for
/// families that may need to re-authenticate or re-resolve the device name
/// before the actual command.
pub fn item_worst_case(retry: &RetryPolicy, login_factor: u32, name_reload_factor: u32) -> Duration {
    retry
        .worst_case()
        .saturating_mul(login_factor.max(1))
        .saturating_mul(name_reload_factor.max(1))
        .saturating_add(ITEM_OVERHEAD)
}

/// `sleep * 3 + Σ item worst cases`.
pub fn computed_budget(sleep: Duration, items: impl IntoIterator<Item = Duration>) -> Duration {
    items.into_iter().fold(
        sleep.saturating_mul(SLEEP_INTERVALS_PER_BUDGET),
        Duration::saturating_add,
    )
}

/// Budget for an item-driven poller.
pub fn poller_budget(config: &PollerConfig, item_count: usize) -> Duration {
    if let Some(explicit) = config.alert_time() {
        return explicit;
    }
    let per_item = item_worst_case(&config.retry, config.login_factor, config.name_reload_factor);
    computed_budget(config.sleep_interval(), std::iter::repeat_n(per_item, item_count))
}

/// Budget for a poller without items (countdown, controller).
pub fn itemless_budget(explicit: Option<Duration>, sleep: Duration, extra: Duration) -> Duration {
    explicit.unwrap_or_else(|| computed_budget(sleep, [extra]))
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn single_attempt() -> RetryPolicy {
        RetryPolicy {
            retry_count: 0,
            retry_min_wait_ms: 0,
            retry_wait_span_ms: 0,
            timeout_ms: 5000,
        }
    }

    #[test]
    fn one_item_no_retry_is_nine_seconds() {
        let config = PollerConfig {
            sleep_interval_ms: 1000,
            alert_time_ms: None,
            retry: single_attempt(),
            ..PollerConfig::default()
        };
        assert_eq!(poller_budget(&config, 1), Duration::from_millis(9000));
    }

    #[test]
    fn explicit_alert_time_wins() {
        let config = PollerConfig {
            alert_time_ms: Some(1234),
            ..PollerConfig::default()
        };
        assert_eq!(poller_budget(&config, 10), Duration::from_millis(1234));
    }

    #[test]
    fn login_and_name_reload_scale_command_time() {
        let retry = single_attempt();
        assert_eq!(item_worst_case(&retry, 1, 1), Duration::from_secs(6));
        assert_eq!(item_worst_case(&retry, 2, 1), Duration::from_secs(11));
        assert_eq!(item_worst_case(&retry, 2, 3), Duration::from_secs(31));
    }

    #[test]
    fn zero_factors_count_as_one() {
        let retry = single_attempt();
        assert_eq!(item_worst_case(&retry, 0, 0), item_worst_case(&retry, 1, 1));
    }

    #[test]
    fn no_items_leaves_sleep_allowance() {
        assert_eq!(
            computed_budget(Duration::from_millis(500), []),
            Duration::from_millis(1500)
        );
        assert_eq!(
            itemless_budget(None, Duration::from_secs(1), Duration::from_secs(2)),
            Duration::from_secs(5)
        );
    }
}
