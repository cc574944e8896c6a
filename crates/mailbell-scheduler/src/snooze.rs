use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::{callbacks::Notifier, error::Result, store::MailStore};

/// Restore every snoozed email whose snooze has expired.
///
/// Entries are processed in order; the first error aborts the pass and is
/// returned. Entries not yet restored keep `restored = 0` and are picked up
/// again on the next poll.
pub(crate) fn restore_due_snoozes(
    store: &MailStore,
    notifier: &Notifier,
    now: DateTime<Utc>,
) -> Result<usize> {
    let due = store.due_snoozes(now)?;
    if due.is_empty() {
        debug!("no snoozed emails due");
        return Ok(0);
    }

    for entry in &due {
        store.restore_snooze(entry)?;
        info!(
            snooze_id = %entry.id,
            email_id = %entry.email_id,
            folder_id = %entry.original_folder_id,
            "snoozed email restored"
        );
        notifier.snooze_restored(&entry.email_id, &entry.account_id, &entry.original_folder_id);
    }
    Ok(due.len())
}
