use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::{callbacks::Notifier, error::Result, store::MailStore};

const NO_SUBJECT: &str = "(no subject)";
const UNKNOWN_SENDER: &str = "Unknown";

/// Fire every reminder whose time has come.
///
/// Same abort semantics as the snooze pass: the first error ends the pass and
/// the remaining reminders stay due.
pub(crate) fn trigger_due_reminders(
    store: &MailStore,
    notifier: &Notifier,
    now: DateTime<Utc>,
) -> Result<usize> {
    let due = store.due_reminders(now)?;
    if due.is_empty() {
        debug!("no reminders due");
        return Ok(0);
    }

    for reminder in &due {
        store.mark_reminder_triggered(&reminder.id)?;
        info!(reminder_id = %reminder.id, email_id = %reminder.email_id, "reminder triggered");
        notifier.reminder_due(
            &reminder.email_id,
            &reminder.account_id,
            reminder.subject.as_deref().unwrap_or(NO_SUBJECT),
            reminder.from_email.as_deref().unwrap_or(UNKNOWN_SENDER),
        );
    }
    Ok(due.len())
}
