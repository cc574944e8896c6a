//! Host notifications.
//!
//! Callbacks are best-effort and synchronous: they run on the tick task right
//! after the state change they report has been committed, and must return
//! quickly. A panicking callback is logged and otherwise ignored.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, warn};

/// Notification interface implemented by the host application.
///
/// Every method has a no-op default, so hosts implement only what they need.
pub trait SchedulerCallbacks: Send + Sync {
    /// A snoozed email was moved back into `folder_id`.
    fn on_snooze_restore(&self, _email_id: &str, _account_id: &str, _folder_id: &str) {}

    /// A reminder came due. `subject` / `from_email` fall back to
    /// `"(no subject)"` / `"Unknown"`.
    fn on_reminder_due(&self, _email_id: &str, _account_id: &str, _subject: &str, _from_email: &str) {}

    /// A scheduled send was delivered (`success`) or failed terminally.
    /// Attempts that will be retried are not reported.
    fn on_scheduled_send_result(&self, _scheduled_id: &str, _success: bool, _error: Option<&str>) {}
}

/// Serializable form of every notification, for hosts that consume a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerEvent {
    SnoozeRestored {
        email_id: String,
        account_id: String,
        folder_id: String,
    },
    ReminderDue {
        email_id: String,
        account_id: String,
        subject: String,
        from_email: String,
    },
    ScheduledSendResult {
        scheduled_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Forwards notifications as [`SchedulerEvent`]s over an mpsc channel.
///
/// Uses `try_send`, so a slow consumer never stalls a tick: when the channel
/// is full or closed the event is dropped with a warning.
pub struct ChannelCallbacks {
    tx: mpsc::Sender<SchedulerEvent>,
}

impl ChannelCallbacks {
    pub fn new(tx: mpsc::Sender<SchedulerEvent>) -> Self {
        Self { tx }
    }

    fn forward(&self, event: SchedulerEvent) {
        if let Err(e) = self.tx.try_send(event) {
            warn!("scheduler event channel full or closed, event dropped: {e}");
        }
    }
}

impl SchedulerCallbacks for ChannelCallbacks {
    fn on_snooze_restore(&self, email_id: &str, account_id: &str, folder_id: &str) {
        self.forward(SchedulerEvent::SnoozeRestored {
            email_id: email_id.to_string(),
            account_id: account_id.to_string(),
            folder_id: folder_id.to_string(),
        });
    }

    fn on_reminder_due(&self, email_id: &str, account_id: &str, subject: &str, from_email: &str) {
        self.forward(SchedulerEvent::ReminderDue {
            email_id: email_id.to_string(),
            account_id: account_id.to_string(),
            subject: subject.to_string(),
            from_email: from_email.to_string(),
        });
    }

    fn on_scheduled_send_result(&self, scheduled_id: &str, success: bool, error: Option<&str>) {
        self.forward(SchedulerEvent::ScheduledSendResult {
            scheduled_id: scheduled_id.to_string(),
            success,
            error: error.map(String::from),
        });
    }
}

/// Per-tick snapshot of the registered callbacks.
///
/// Absent callbacks make every notification a no-op.
pub(crate) struct Notifier {
    callbacks: Option<Arc<dyn SchedulerCallbacks>>,
}

impl Notifier {
    pub(crate) fn new(callbacks: Option<Arc<dyn SchedulerCallbacks>>) -> Self {
        Self { callbacks }
    }

    pub(crate) fn snooze_restored(&self, email_id: &str, account_id: &str, folder_id: &str) {
        self.invoke("on_snooze_restore", |cb| {
            cb.on_snooze_restore(email_id, account_id, folder_id)
        });
    }

    pub(crate) fn reminder_due(&self, email_id: &str, account_id: &str, subject: &str, from: &str) {
        self.invoke("on_reminder_due", |cb| {
            cb.on_reminder_due(email_id, account_id, subject, from)
        });
    }

    pub(crate) fn send_result(&self, scheduled_id: &str, success: bool, error: Option<&str>) {
        self.invoke("on_scheduled_send_result", |cb| {
            cb.on_scheduled_send_result(scheduled_id, success, error)
        });
    }

    fn invoke(&self, name: &'static str, f: impl FnOnce(&dyn SchedulerCallbacks)) {
        let Some(cb) = self.callbacks.as_deref() else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| f(cb))).is_err() {
            error!(callback = name, "host callback panicked, notification dropped");
        }
    }
}
