//! Mail dispatch contract.
//!
//! A sender gets a batch of template files plus SMTP settings and reports a
//! per-template outcome. It never fails as a whole.

use crate::config::MailConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

/// Batch category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MailKind {
    Emergency,
    Info,
}

/// Result for one template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailOutcome {
    pub template: PathBuf,
    pub sent: bool,
    pub error: Option<String>,
}

impl MailOutcome {
    fn failed(template: &Path, error: impl ToString) -> Self {
        Self {
            template: template.to_path_buf(),
            sent: false,
            error: Some(error.to_string()),
        }
    }
}

pub trait MailSender: Send + Sync {
    fn send(&self, kind: MailKind, templates: &[PathBuf], settings: &MailConfig) -> Vec<MailOutcome>;
}

/// Reads every template and logs it instead of delivering.
#[derive(Debug, Default)]
pub struct SimulatedMailSender {
    sent: AtomicUsize,
}

impl SimulatedMailSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Templates successfully "sent" so far.
    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

impl MailSender for SimulatedMailSender {
    fn send(&self, kind: MailKind, templates: &[PathBuf], settings: &MailConfig) -> Vec<MailOutcome> {
        if !settings.simulate {
            warn!(
                "No SMTP transport available for {}:{}; simulating {:?} batch",
                settings.smtp_host, settings.smtp_port, kind
            );
        }
        templates
            .iter()
            .map(|template| match std::fs::read_to_string(template) {
                Ok(body) => {
                    info!(
                        ?kind,
                        template = %template.display(),
                        bytes = body.len(),
                        from = %settings.from,
                        "Simulated mail sent"
                    );
                    self.sent.fetch_add(1, Ordering::SeqCst);
                    MailOutcome {
                        template: template.clone(),
                        sent: true,
                        error: None,
                    }
                }
                Err(e) => {
                    warn!("Mail template {:?} unreadable: {}", template, e);
                    MailOutcome::failed(template, e)
                }
            })
            .collect()
    }
}
