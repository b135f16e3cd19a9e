//! User-facing notifications (toasts).

use std::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Success,
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

/// Receives one notification per mutation outcome.
///
/// Called from async contexts; implementations must not block.
pub trait Notifier: Send + Sync {
    fn success(&self, message: &str);
    fn info(&self, message: &str);
    fn error(&self, message: &str);
}

/// Logs notifications instead of showing them.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpNotifier;

impl Notifier for NoOpNotifier {
    fn success(&self, message: &str) {
        debug!(text = %message, "Notify success");
    }

    fn info(&self, message: &str) {
        debug!(text = %message, "Notify info");
    }

    fn error(&self, message: &str) {
        warn!(text = %message, "Notify error");
    }
}

/// Keeps every notification for later inspection.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
    }

    pub fn last(&self) -> Option<Notification> {
        self.seen.lock().ok().and_then(|seen| seen.last().cloned())
    }

    fn record(&self, level: NotificationLevel, message: &str) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(Notification {
                level,
                message: message.to_string(),
            });
        }
    }
}

impl Notifier for RecordingNotifier {
    fn success(&self, message: &str) {
        self.record(NotificationLevel::Success, message);
    }

    fn info(&self, message: &str) {
        self.record(NotificationLevel::Info, message);
    }

    fn error(&self, message: &str) {
        self.record(NotificationLevel::Error, message);
    }
}
