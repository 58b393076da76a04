//! Shutdown trigger sinks.
//!
//! A trigger is fire-and-forget: implementations log their own failures and
//! never hand an error back into a poller loop. Records are stamped by the
//! caller from its clock.

use crate::panic::{DeviceType, PanicReason};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, warn};

/// One fired shutdown request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRecord {
    pub at: DateTime<Utc>,
    pub device: DeviceType,
    pub source_id: String,
    pub reason: PanicReason,
}

impl TriggerRecord {
    pub fn new(
        at: DateTime<Utc>,
        device: DeviceType,
        source_id: impl Into<String>,
        reason: PanicReason,
    ) -> Self {
        Self {
            at,
            device,
            source_id: source_id.into(),
            reason,
        }
    }
}

/// External shutdown trigger.
pub trait ShutdownTrigger: Send + Sync {
    fn trigger_shut_down(&self, record: &TriggerRecord);
}

/// Logs every request at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogShutdownTrigger;

impl ShutdownTrigger for LogShutdownTrigger {
    fn trigger_shut_down(&self, record: &TriggerRecord) {
        error!(
            device = %record.device,
            source_id = %record.source_id,
            reason = %record.reason,
            at = %record.at,
            "SHUTDOWN TRIGGERED"
        );
    }
}

/// Appends one JSON object per request to a file.
#[derive(Debug)]
pub struct JsonlShutdownTrigger {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlShutdownTrigger {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ShutdownTrigger for JsonlShutdownTrigger {
    fn trigger_shut_down(&self, record: &TriggerRecord) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize trigger record: {}", e);
                return;
            }
        };
        let mut file = self.file.lock();
        if let Err(e) = writeln!(file, "{line}").and_then(|_| file.flush()) {
            error!("Failed to append trigger record to {:?}: {}", self.path, e);
        }
    }
}

/// Keeps every request in memory.
#[derive(Debug, Default)]
pub struct RecordingTrigger {
    records: Mutex<Vec<TriggerRecord>>,
}

impl RecordingTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TriggerRecord> {
        self.records.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.records.lock().len()
    }

    /// Number of requests with the given reason.
    pub fn count_reason(&self, reason: PanicReason) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|r| r.reason == reason)
            .count()
    }
}

impl ShutdownTrigger for RecordingTrigger {
    fn trigger_shut_down(&self, record: &TriggerRecord) {
        self.records.lock().push(record.clone());
    }
}

/// Forwards every request to several sinks.
#[derive(Default, Clone)]
pub struct FanoutTrigger {
    sinks: Vec<Arc<dyn ShutdownTrigger>>,
}

impl FanoutTrigger {
    pub fn new(sinks: Vec<Arc<dyn ShutdownTrigger>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn ShutdownTrigger>) {
        self.sinks.push(sink);
    }
}

impl ShutdownTrigger for FanoutTrigger {
    fn trigger_shut_down(&self, record: &TriggerRecord) {
        if self.sinks.is_empty() {
            warn!(source_id = %record.source_id, reason = %record.reason, "Shutdown requested but no trigger sink configured");
        }
        for sink in &self.sinks {
            sink.trigger_shut_down(record);
        }
    }
}
