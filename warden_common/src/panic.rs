//! Device families, device-specific panic variants and the universal
//! reason reported to the shutdown trigger.
//!
//! Items report panics in their own vocabulary ([`SwitchPanic`],
//! [`FilePanic`]); the poller core only ever sees [`PanicReason`], obtained
//! through [`universal_reason`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies the source family of a shutdown request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    /// USB power switches driven through a process-based API.
    Cleware,
    /// Fritz!DECT smart plugs behind an authenticated HTTP API.
    Fritz,
    /// SwitchBot plugs addressed by display name through a cloud API.
    SwitchBot,
    /// Dead-man files read from peers.
    WatcherFileRead,
    /// Dead-man files written for peers.
    WatcherFileWrite,
    /// The countdown timer.
    Countdown,
    /// The main controller itself.
    MainController,
}

impl DeviceType {
    /// Short lowercase tag used in logs and trigger records.
    pub const fn tag(self) -> &'static str {
        match self {
            DeviceType::Cleware => "cleware",
            DeviceType::Fritz => "fritz",
            DeviceType::SwitchBot => "switchbot",
            DeviceType::WatcherFileRead => "watcher_read",
            DeviceType::WatcherFileWrite => "watcher_write",
            DeviceType::Countdown => "countdown",
            DeviceType::MainController => "controller",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Panic vocabulary of power switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwitchPanic {
    /// Device did not answer within its retry budget.
    Unreachable,
    /// Reported relay state differs from the commanded one.
    StateMismatch,
    /// Relay reports off while it should be on.
    PowerOff,
    /// Session could not be (re-)established.
    LoginFailed,
    /// Configured name no longer resolves to a device.
    NameNotFound,
}

/// Panic vocabulary of dead-man files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilePanic {
    Missing,
    /// Timestamp inside the file is older than allowed.
    Stale,
    Unreadable,
    /// Peer wrote a panic marker.
    PeerPanicked,
    WriteFailed,
}

/// Current panic state of one monitored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ItemPanic {
    #[default]
    None,
    Switch(SwitchPanic),
    File(FilePanic),
    /// Item-level fault outside the device vocabulary.
    Fault,
}

impl ItemPanic {
    #[inline]
    pub const fn is_panic(self) -> bool {
        !matches!(self, ItemPanic::None)
    }
}

/// Universal reason passed to [`crate::trigger::ShutdownTrigger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PanicReason {
    /// Planned shutdown (countdown reached T0 without any panic).
    NoPanic,
    /// Unrecoverable fault in a poller's own bookkeeping.
    GeneralError,
    /// A poller's heartbeat exceeded its alert budget.
    Unresponsive,
    /// Shutdown could not be verified after the countdown fired.
    CheckConditionViolation,
    DeviceUnreachable,
    DeviceStateChanged,
    AuthenticationFailed,
    ConfigurationMismatch,
    FileMissing,
    FileStale,
    FileError,
    PeerPanicked,
}

impl fmt::Display for PanicReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Map an item's device-specific panic onto the universal reason.
pub const fn universal_reason(panic: ItemPanic) -> PanicReason {
    match panic {
        ItemPanic::None => PanicReason::NoPanic,
        ItemPanic::Fault => PanicReason::GeneralError,
        ItemPanic::Switch(p) => match p {
            SwitchPanic::Unreachable => PanicReason::DeviceUnreachable,
            SwitchPanic::StateMismatch | SwitchPanic::PowerOff => PanicReason::DeviceStateChanged,
            SwitchPanic::LoginFailed => PanicReason::AuthenticationFailed,
            SwitchPanic::NameNotFound => PanicReason::ConfigurationMismatch,
        },
        ItemPanic::File(p) => match p {
            FilePanic::Missing => PanicReason::FileMissing,
            FilePanic::Stale => PanicReason::FileStale,
            FilePanic::Unreadable | FilePanic::WriteFailed => PanicReason::FileError,
            FilePanic::PeerPanicked => PanicReason::PeerPanicked,
        },
    }
}
