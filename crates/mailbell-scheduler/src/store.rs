use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, Connection, OptionalExtension, Row};
use tracing::warn;

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    types::{ReminderRow, ScheduledSendRow, SendStatus, SnoozedRow},
};

const SEND_COLUMNS: &str = "id, account_id, to_addrs, cc_addrs, bcc_addrs, subject, body_html,
     attachments_json, draft_id, send_at, status, retry_count, error_message";

/// Typed access to the mailbox tables the scheduler works on.
///
/// Cheap to clone: every clone shares one SQLite connection behind a `Mutex`.
/// No method holds the lock across an `.await`, so a store can be used from
/// async code freely.
#[derive(Clone)]
pub struct MailStore {
    conn: Arc<Mutex<Connection>>,
}

impl MailStore {
    /// Wrap an open connection, initialising the scheduler tables if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    /// Lock the shared connection for collaborators that need raw SQL
    /// (mail sync, compose). Keep the guard short-lived.
    pub fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| SchedulerError::LockPoisoned)
    }

    // --- snoozes -----------------------------------------------------------

    /// Unrestored snooze entries whose `snooze_until` has arrived.
    pub fn due_snoozes(&self, now: DateTime<Utc>) -> Result<Vec<SnoozedRow>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, email_id, account_id, original_folder_id, snooze_until
             FROM snoozed_emails
             WHERE snooze_until <= ?1 AND restored = 0
             ORDER BY snooze_until, id",
        )?;
        let rows = stmt.query_map([now.timestamp_millis()], row_to_snooze)?;
        collect_rows(rows, "snoozed_emails")
    }

    /// The unrestored snooze entry with this ID, if any.
    pub fn unrestored_snooze(&self, id: &str) -> Result<Option<SnoozedRow>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, email_id, account_id, original_folder_id, snooze_until
             FROM snoozed_emails
             WHERE id = ?1 AND restored = 0",
        )?;
        Ok(stmt.query_row([id], row_to_snooze).optional()?)
    }

    /// Move the email back to its folder and mark the entry restored, atomically.
    pub(crate) fn restore_snooze(&self, row: &SnoozedRow) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE emails SET is_snoozed = 0, folder_id = ?1 WHERE id = ?2",
            params![row.original_folder_id, row.email_id],
        )?;
        tx.execute(
            "UPDATE snoozed_emails SET restored = 1 WHERE id = ?1",
            [&row.id],
        )?;
        tx.commit()?;
        Ok(())
    }

    // --- scheduled sends ---------------------------------------------------

    /// Pending sends whose `send_at` has arrived, oldest first.
    pub fn due_scheduled_sends(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledSendRow>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {SEND_COLUMNS} FROM scheduled_emails
             WHERE send_at <= ?1 AND status = 'pending'
             ORDER BY send_at, id"
        ))?;
        let rows = stmt.query_map([now.timestamp_millis()], row_to_send)?;
        collect_rows(rows, "scheduled_emails")
    }

    pub fn get_scheduled_send(&self, id: &str) -> Result<Option<ScheduledSendRow>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {SEND_COLUMNS} FROM scheduled_emails WHERE id = ?1"
        ))?;
        Ok(stmt.query_row([id], row_to_send).optional()?)
    }

    pub fn list_scheduled_sends(&self, account_id: &str) -> Result<Vec<ScheduledSendRow>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {SEND_COLUMNS} FROM scheduled_emails
             WHERE account_id = ?1
             ORDER BY send_at, id"
        ))?;
        let rows = stmt.query_map([account_id], row_to_send)?;
        collect_rows(rows, "scheduled_emails")
    }

    /// Claim a pending send for delivery (`pending -> sending`).
    ///
    /// Returns `false` when the row was no longer pending, i.e. another tick
    /// or process claimed it first.
    pub(crate) fn claim_send(&self, id: &str) -> Result<bool> {
        let conn = self.connection()?;
        let n = conn.execute(
            "UPDATE scheduled_emails SET status = ?1 WHERE id = ?2 AND status = ?3",
            params![SendStatus::Sending, id, SendStatus::Pending],
        )?;
        Ok(n == 1)
    }

    /// Mark a send delivered and drop its draft in one transaction.
    pub(crate) fn complete_send(&self, id: &str, draft_id: Option<&str>) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE scheduled_emails SET status = ?1 WHERE id = ?2",
            params![SendStatus::Sent, id],
        )?;
        if let Some(draft_id) = draft_id {
            tx.execute("DELETE FROM drafts WHERE id = ?1", [draft_id])?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Return a failed attempt to the queue with its new retry count.
    pub(crate) fn requeue_send(&self, id: &str, retry_count: u32) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "UPDATE scheduled_emails SET status = ?1, retry_count = ?2 WHERE id = ?3",
            params![SendStatus::Pending, retry_count, id],
        )?;
        Ok(())
    }

    /// Terminal failure: no further automatic attempts.
    pub(crate) fn fail_send(&self, id: &str, retry_count: u32, error_message: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "UPDATE scheduled_emails SET status = ?1, retry_count = ?2, error_message = ?3
             WHERE id = ?4",
            params![SendStatus::Failed, retry_count, error_message, id],
        )?;
        Ok(())
    }

    /// Reset sends left in `sending` by an interrupted process. Returns the count.
    pub(crate) fn recover_interrupted_sends(&self) -> Result<usize> {
        let conn = self.connection()?;
        let n = conn.execute(
            "UPDATE scheduled_emails SET status = ?1 WHERE status = ?2",
            params![SendStatus::Pending, SendStatus::Sending],
        )?;
        Ok(n)
    }

    // --- reminders ---------------------------------------------------------

    /// Untriggered reminders whose `remind_at` has arrived, with the email's
    /// subject and sender when the email still exists.
    pub fn due_reminders(&self, now: DateTime<Utc>) -> Result<Vec<ReminderRow>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare_cached(
            "SELECT r.id, r.email_id, r.account_id, r.remind_at, e.subject, e.from_email
             FROM reminders r
             LEFT JOIN emails e ON e.id = r.email_id
             WHERE r.remind_at <= ?1 AND r.is_triggered = 0
             ORDER BY r.remind_at, r.id",
        )?;
        let rows = stmt.query_map([now.timestamp_millis()], |row| {
            Ok(ReminderRow {
                id: row.get(0)?,
                email_id: row.get(1)?,
                account_id: row.get(2)?,
                remind_at: timestamp_at(row, 3)?,
                subject: row.get(4)?,
                from_email: row.get(5)?,
            })
        })?;
        collect_rows(rows, "reminders")
    }

    pub(crate) fn mark_reminder_triggered(&self, id: &str) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        tx.execute("UPDATE reminders SET is_triggered = 1 WHERE id = ?1", [id])?;
        tx.commit()?;
        Ok(())
    }
}

fn row_to_snooze(row: &Row<'_>) -> rusqlite::Result<SnoozedRow> {
    Ok(SnoozedRow {
        id: row.get(0)?,
        email_id: row.get(1)?,
        account_id: row.get(2)?,
        original_folder_id: row.get(3)?,
        snooze_until: timestamp_at(row, 4)?,
    })
}

/// Map a SQLite row to a `ScheduledSendRow` (column order: `SEND_COLUMNS`).
fn row_to_send(row: &Row<'_>) -> rusqlite::Result<ScheduledSendRow> {
    Ok(ScheduledSendRow {
        id: row.get(0)?,
        account_id: row.get(1)?,
        to: row.get(2)?,
        cc: row.get(3)?,
        bcc: row.get(4)?,
        subject: row.get(5)?,
        body_html: row.get(6)?,
        attachments_json: row.get(7)?,
        draft_id: row.get(8)?,
        send_at: timestamp_at(row, 9)?,
        status: row.get(10)?,
        // Negative counts fail here with IntegralValueOutOfRange.
        retry_count: row.get(11)?,
        error_message: row.get(12)?,
    })
}

/// Read an epoch-millisecond column as a UTC instant.
fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            format!("timestamp out of range: {ms}").into(),
        )
    })
}

/// Collect mapped rows, skipping rows whose values fail conversion.
///
/// A malformed row would otherwise block its whole job class on every poll.
/// Any other error (I/O, locking) is propagated.
fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
    table: &'static str,
) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        match row {
            Ok(r) => out.push(r),
            Err(
                e @ (rusqlite::Error::FromSqlConversionFailure(..)
                | rusqlite::Error::InvalidColumnType(..)
                | rusqlite::Error::IntegralValueOutOfRange(..)),
            ) => warn!(table, "skipping malformed row: {e}"),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(out)
}
