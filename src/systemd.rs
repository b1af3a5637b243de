//! Thin wrapper around systemd sd_notify integration.
//!
//! All notifications are no-ops when `enabled` is false or on non-Linux
//! platforms, which keeps the rest of the codebase free from `#[cfg]`
//! conditionals. Alerts are always logged.

use crate::scheduler::{Job, MonitorSink};
use crate::sync::SyncError;

/// Holds the runtime flag controlling whether sd-notify messages are sent.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SystemdNotifier {
    enabled: bool,
}

impl SystemdNotifier {
    /// Create a new notifier. When `enabled` is false, all methods are no-ops.
    pub(crate) fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    #[cfg(target_os = "linux")]
    fn send(&self, state: &[sd_notify::NotifyState<'_>], label: &str) {
        if !self.enabled {
            return;
        }
        if let Err(e) = sd_notify::notify(false, state) {
            tracing::debug!(error = %e, "sd_notify {} failed", label);
        }
    }

    #[cfg(target_os = "linux")]
    fn send_ready(&self) {
        self.send(&[sd_notify::NotifyState::Ready], "READY");
    }

    #[cfg(not(target_os = "linux"))]
    fn send_ready(&self) {}

    #[cfg(target_os = "linux")]
    fn send_stopping(&self) {
        self.send(&[sd_notify::NotifyState::Stopping], "STOPPING");
    }

    #[cfg(not(target_os = "linux"))]
    fn send_stopping(&self) {}

    #[cfg(target_os = "linux")]
    fn send_status(&self, msg: &str) {
        self.send(&[sd_notify::NotifyState::Status(msg)], "STATUS");
    }

    #[cfg(not(target_os = "linux"))]
    fn send_status(&self, _msg: &str) {}

    #[cfg(target_os = "linux")]
    fn send_watchdog(&self) {
        self.send(&[sd_notify::NotifyState::Watchdog], "WATCHDOG");
    }

    #[cfg(not(target_os = "linux"))]
    fn send_watchdog(&self) {}
}

impl MonitorSink for SystemdNotifier {
    fn ready(&self) {
        self.send_ready();
    }

    fn heartbeat(&self) {
        self.send_watchdog();
    }

    fn status(&self, message: &str) {
        self.send_status(message);
    }

    fn alert(&self, job: Job, consecutive_failures: u32, error: &SyncError) {
        tracing::error!(
            %job,
            consecutive_failures,
            fatal = error.is_fatal(),
            "Job keeps failing, needs attention: {}",
            error
        );
        self.send_status(&format!(
            "ALERT: {job} failed {consecutive_failures} times in a row: {error}"
        ));
    }

    fn stopping(&self) {
        self.send_stopping();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(n: &SystemdNotifier) {
        n.ready();
        n.heartbeat();
        n.status("incremental: 3 new");
        n.alert(
            Job::Incremental,
            3,
            &SyncError::Authentication("Invalid API key".into()),
        );
        n.stopping();
    }

    #[test]
    fn disabled_notifier_is_noop() {
        exercise(&SystemdNotifier::new(false));
    }

    #[test]
    fn enabled_notifier_does_not_panic() {
        // Without a NOTIFY_SOCKET sd_notify returns Ok and sends nothing.
        exercise(&SystemdNotifier::new(true));
    }
}
