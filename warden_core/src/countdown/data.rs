//! Countdown deadlines.
//!
//! Pure data: every deadline is derived from T0 and the configured minute
//! offsets. Each carries a reached/triggered pair where triggered implies
//! reached and a triggered deadline never fires again. Replacing T0 means
//! building a fresh [`CountdownData`].

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use warden_common::config::CountdownConfig;
use warden_common::store::CountdownSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    pub at: DateTime<Utc>,
    reached: bool,
    triggered: bool,
}

impl Deadline {
    pub const fn new(at: DateTime<Utc>) -> Self {
        Self {
            at,
            reached: false,
            triggered: false,
        }
    }

    #[inline]
    pub const fn reached(&self) -> bool {
        self.reached
    }

    #[inline]
    pub const fn triggered(&self) -> bool {
        self.triggered
    }

    /// `now - at`; positive once the deadline passed.
    #[inline]
    pub fn elapsed(&self, now: DateTime<Utc>) -> ChronoDuration {
        now - self.at
    }

    #[inline]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.at
    }

    pub fn mark_reached(&mut self) {
        self.reached = true;
    }

    pub fn mark_triggered(&mut self) {
        self.reached = true;
        self.triggered = true;
    }

    /// Move the deadline to `at`, keeping it reached but re-armed.
    pub fn requeue(&mut self, at: DateTime<Utc>) {
        self.at = at;
        self.reached = true;
        self.triggered = false;
    }
}

fn minutes(m: u32) -> ChronoDuration {
    ChronoDuration::minutes(i64::from(m))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountdownData {
    pub t0: Deadline,
    pub safe_mode: Option<Deadline>,
    pub check_shut_down: Option<Deadline>,
    pub emails: Option<Deadline>,
    /// Safe mode entered by the countdown. Separate from `safe_mode`
    /// because that deadline may not exist.
    pub safe_mode_triggered: bool,
    check_after: ChronoDuration,
}

impl CountdownData {
    pub fn new(t0: DateTime<Utc>, config: &CountdownConfig) -> Self {
        let safe_mode = (config.safe_mode_minutes > 0)
            .then(|| Deadline::new(t0 - minutes(config.safe_mode_minutes)));
        let check_shut_down = (config.check_shutdown_after_minutes > 0)
            .then(|| Deadline::new(t0 + minutes(config.check_shutdown_after_minutes)));
        let emails = config
            .emails_after_minutes
            .map(|m| Deadline::new(t0 + minutes(m)));
        Self {
            t0: Deadline::new(t0),
            safe_mode,
            check_shut_down,
            emails,
            safe_mode_triggered: false,
            check_after: minutes(config.check_shutdown_after_minutes),
        }
    }

    /// Safe mode is due at its own deadline, or at T0 when there is none.
    pub fn safe_mode_due(&self, now: DateTime<Utc>) -> bool {
        match &self.safe_mode {
            Some(deadline) => deadline.is_due(now),
            None => self.t0.is_due(now),
        }
    }

    pub fn mark_safe_mode_triggered(&mut self) {
        self.safe_mode_triggered = true;
        if let Some(deadline) = self.safe_mode.as_mut() {
            deadline.mark_triggered();
        }
    }

    /// Re-schedule a failed verification `check_after` from `now`.
    pub fn requeue_check(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let at = now + self.check_after;
        self.check_shut_down.as_mut().map(|deadline| {
            deadline.requeue(at);
            at
        })
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> CountdownSnapshot {
        CountdownSnapshot {
            t0: Some(self.t0.at),
            seconds_to_t0: Some((self.t0.at - now).num_seconds()),
            safe_mode_at: self.safe_mode.map(|d| d.at),
            check_shut_down_at: self.check_shut_down.map(|d| d.at),
            emails_at: self.emails.map(|d| d.at),
            safe_mode_triggered: self.safe_mode_triggered,
            t0_reached: self.t0.reached(),
            countdown_triggered: self.t0.triggered(),
            shut_down_verified: self.check_shut_down.is_some_and(|d| d.triggered()),
            mail_sent: self.emails.is_some_and(|d| d.triggered()),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
