//! User-visible notices collected during publishing.
//!
//! Non-fatal failures (a copy that did not go through, a source stream that
//! could not be opened) are logged and appended here so a driver can report
//! them after a bulk run instead of aborting it.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Notice,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub severity: Severity,
    pub text: String,
    pub sha1: Option<String>,
    pub filename: Option<String>,
}

/// Shared, clonable message list.
#[derive(Debug, Clone, Default)]
pub struct MessageCollector {
    inner: Arc<Mutex<Vec<Message>>>,
}

impl MessageCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, message: Message) {
        match message.severity {
            Severity::Notice => info!(sha1 = ?message.sha1, "{}", message.text),
            Severity::Warning => warn!(sha1 = ?message.sha1, filename = ?message.filename, "{}", message.text),
            Severity::Error => error!(sha1 = ?message.sha1, filename = ?message.filename, "{}", message.text),
        }
        self.lock().push(message);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Message>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a warning about one resource.
    pub fn warn(&self, sha1: &str, filename: &str, text: impl Into<String>) {
        self.append(Message {
            severity: Severity::Warning,
            text: text.into(),
            sha1: Some(sha1.to_string()),
            filename: Some(filename.to_string()),
        });
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().clone()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.lock()
            .iter()
            .filter(|m| m.severity == severity)
            .count()
    }

    /// Remove and return everything collected so far.
    pub fn drain(&self) -> Vec<Message> {
        std::mem::take(&mut *self.lock())
    }
}
