//! Configuration loading traits and types.
//!
//! All Warden settings live in one TOML file. Only `[shared]` is required;
//! every other section falls back to its defaults.
//!
//! # Usage
//!
//! ```rust,no_run
//! use warden_common::config::{ConfigLoader, ConfigError, WardenConfig};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = WardenConfig::load(Path::new("warden.toml"))?;
//!     config.validate()?;
//!     println!("Service: {}", config.shared.service_name);
//!     Ok(())
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Common configuration fields.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "warden-cellar-01"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Appliance instance identifier.
    pub service_name: String,
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Retry policy of one device command.
///
/// Worst case of a single command is
/// `(retry_min_wait + retry_wait_span + timeout) * retry_count + timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub retry_count: u32,
    pub retry_min_wait_ms: u64,
    /// Random extra wait on top of `retry_min_wait_ms`.
    pub retry_wait_span_ms: u64,
    pub timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_count: 2,
            retry_min_wait_ms: 500,
            retry_wait_span_ms: 1000,
            timeout_ms: 5000,
        }
    }
}

impl RetryPolicy {
    /// Worst-case duration of one command including all retries.
    pub fn worst_case(&self) -> Duration {
        let per_attempt = self.retry_min_wait_ms + self.retry_wait_span_ms + self.timeout_ms;
        Duration::from_millis(per_attempt * u64::from(self.retry_count) + self.timeout_ms)
    }

    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 && self.retry_count > 0 {
            return Err(ConfigError::ValidationError(format!(
                "[{section}.retry] retry_count > 0 requires a non-zero timeout_ms"
            )));
        }
        Ok(())
    }
}

/// Settings of one device-family poller.
///
/// # TOML Example
///
/// ```toml
/// [fritz]
/// sleep_interval_ms = 2000
/// min_poller_count_to_arm = 3
/// login_factor = 2
/// items = ["plug-nas", "plug-router"]
///
/// [fritz.retry]
/// retry_count = 1
/// timeout_ms = 4000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Omit this poller entirely when false.
    pub enabled: bool,
    pub sleep_interval_ms: u64,
    /// Explicit alert budget; computed from the retry policy when absent.
    pub alert_time_ms: Option<u64>,
    /// Completed iterations required before arming is allowed.
    pub min_poller_count_to_arm: u64,
    /// Enter safe mode (locally and globally) on the first armed panic.
    pub auto_safe_mode: bool,
    /// Bounded wait for every guarded field of this poller.
    pub lock_timeout_ms: u64,
    /// How long `has_shut_down` must hold before it counts as verified.
    pub shutdown_verify_ms: u64,
    /// Budget multiplier for families that re-authenticate.
    pub login_factor: u32,
    /// Budget multiplier for families that re-resolve device names.
    pub name_reload_factor: u32,
    /// Identifiers of the monitored items.
    pub items: Vec<String>,
    pub retry: RetryPolicy,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sleep_interval_ms: 1000,
            alert_time_ms: None,
            min_poller_count_to_arm: 3,
            auto_safe_mode: false,
            lock_timeout_ms: 5000,
            shutdown_verify_ms: 10_000,
            login_factor: 1,
            name_reload_factor: 1,
            items: Vec::new(),
            retry: RetryPolicy::default(),
        }
    }
}

impl PollerConfig {
    #[inline]
    pub fn sleep_interval(&self) -> Duration {
        Duration::from_millis(self.sleep_interval_ms)
    }

    #[inline]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    #[inline]
    pub fn alert_time(&self) -> Option<Duration> {
        self.alert_time_ms.map(Duration::from_millis)
    }

    #[inline]
    pub fn shutdown_verify(&self) -> Duration {
        Duration::from_millis(self.shutdown_verify_ms)
    }

    /// Validate one poller section.
    pub fn validate(&self, section: &str) -> Result<(), ConfigError> {
        if self.sleep_interval_ms == 0 {
            return Err(ConfigError::ValidationError(format!(
                "[{section}] sleep_interval_ms must be > 0"
            )));
        }
        if self.lock_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(format!(
                "[{section}] lock_timeout_ms must be > 0"
            )));
        }
        if self.alert_time_ms == Some(0) {
            return Err(ConfigError::ValidationError(format!(
                "[{section}] alert_time_ms must be > 0 when set"
            )));
        }
        self.retry.validate(section)
    }
}

/// Countdown settings.
///
/// Deadlines are derived from `t0`:
/// safe mode at `t0 - safe_mode_minutes`, shutdown verification at
/// `t0 + check_shutdown_after_minutes`, mail at `t0 + emails_after_minutes`.
/// A zero minute value (or an absent `emails_after_minutes`) disables that
/// deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CountdownConfig {
    pub enabled: bool,
    /// RFC 3339 timestamp, e.g. `"2026-11-01T06:00:00Z"`.
    pub t0: Option<DateTime<Utc>>,
    pub safe_mode_minutes: u32,
    pub check_shutdown_after_minutes: u32,
    pub emails_after_minutes: Option<u32>,
    /// Fire the shutdown trigger when T0 is reached.
    pub trigger_on_t0: bool,
    /// Delay between the two independent mail gate checks.
    pub mail_recheck_delay_ms: u64,
    pub sleep_interval_ms: u64,
    pub alert_time_ms: Option<u64>,
    pub min_poller_count_to_arm: u64,
    pub lock_timeout_ms: u64,
}

impl Default for CountdownConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            t0: None,
            safe_mode_minutes: 0,
            check_shutdown_after_minutes: 0,
            emails_after_minutes: None,
            trigger_on_t0: true,
            mail_recheck_delay_ms: 1000,
            sleep_interval_ms: 1000,
            alert_time_ms: None,
            min_poller_count_to_arm: 1,
            lock_timeout_ms: 5000,
        }
    }
}

impl CountdownConfig {
    #[inline]
    pub fn sleep_interval(&self) -> Duration {
        Duration::from_millis(self.sleep_interval_ms)
    }

    #[inline]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    #[inline]
    pub fn mail_recheck_delay(&self) -> Duration {
        Duration::from_millis(self.mail_recheck_delay_ms)
    }

    /// An enabled countdown refuses to arm until it has a T0 in the future,
    /// so with this configuration the fleet cannot be armed at `now`.
    pub fn blocks_arming(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.t0.is_none_or(|t0| t0 <= now)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sleep_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "[countdown] sleep_interval_ms must be > 0".to_string(),
            ));
        }
        if self.lock_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "[countdown] lock_timeout_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Main controller settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub sleep_interval_ms: u64,
    pub alert_time_ms: Option<u64>,
    pub lock_timeout_ms: u64,
    /// Priority of this appliance for mail dispatch. A live peer with a
    /// higher priority suppresses our mail.
    pub mail_priority: u32,
    /// Minutes the controller must have been shut down before mail may go out.
    pub min_minutes_since_shutdown_for_mail: u32,
    pub mail_sending_disabled: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            sleep_interval_ms: 1000,
            alert_time_ms: None,
            lock_timeout_ms: 5000,
            mail_priority: 0,
            min_minutes_since_shutdown_for_mail: 0,
            mail_sending_disabled: false,
        }
    }
}

impl ControllerConfig {
    #[inline]
    pub fn sleep_interval(&self) -> Duration {
        Duration::from_millis(self.sleep_interval_ms)
    }

    #[inline]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sleep_interval_ms == 0 || self.lock_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "[controller] sleep_interval_ms and lock_timeout_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// SMTP settings and mail template lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub from: String,
    /// Log instead of delivering.
    pub simulate: bool,
    /// Templates sent first.
    pub emergency: Vec<PathBuf>,
    pub info: Vec<PathBuf>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_host: "localhost".to_string(),
            smtp_port: 25,
            from: "warden@localhost".to_string(),
            simulate: true,
            emergency: Vec::new(),
            info: Vec::new(),
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenConfig {
    pub shared: SharedConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub cleware: PollerConfig,
    #[serde(default)]
    pub fritz: PollerConfig,
    #[serde(default)]
    pub switchbot: PollerConfig,
    #[serde(default)]
    pub watcher_read: PollerConfig,
    #[serde(default)]
    pub watcher_write: PollerConfig,
    #[serde(default)]
    pub countdown: CountdownConfig,
    #[serde(default)]
    pub mail: MailConfig,
}

impl WardenConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.controller.validate()?;
        for (section, poller) in self.pollers() {
            poller.validate(section)?;
        }
        self.countdown.validate()
    }

    /// Device-family sections in fleet order.
    pub fn pollers(&self) -> [(&'static str, &PollerConfig); 5] {
        [
            ("cleware", &self.cleware),
            ("fritz", &self.fritz),
            ("switchbot", &self.switchbot),
            ("watcher_read", &self.watcher_read),
            ("watcher_write", &self.watcher_write),
        ]
    }
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}
