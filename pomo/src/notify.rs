//! Desktop notifications for break and completion events.

use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(String);

pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str) -> Result<(), NotifyError>;
}

/// Swallows everything. Always an acceptable substitute.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _title: &str, _body: &str) -> Result<(), NotifyError> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DesktopNotifier;

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, body: &str) -> Result<(), NotifyError> {
        notify_rust::Notification::new()
            .summary(title)
            .body(body)
            .appname("pomo")
            .show()
            .map(|_| ())
            .map_err(|e| NotifyError(e.to_string()))
    }
}

/// Picks the notifier for `enabled`.
pub fn notifier(enabled: bool) -> Arc<dyn Notifier> {
    if enabled {
        Arc::new(DesktopNotifier)
    } else {
        Arc::new(NoopNotifier)
    }
}

/// Best effort: a failed notification is logged and otherwise ignored.
pub(crate) fn send(notifier: &dyn Notifier, title: &str, body: &str) {
    if let Err(e) = notifier.notify(title, body) {
        warn!("Failed to send notification: {}", e);
    }
}
