use rusqlite::Connection;

use crate::error::Result;

/// Initialise the tables the scheduler reads and writes in `conn`.
///
/// Idempotent. Only the columns the engine touches are declared; a host that
/// already owns a fuller `emails` / `drafts` schema keeps it untouched.
/// Timestamps are Unix epoch milliseconds.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS emails (
            id          TEXT    NOT NULL PRIMARY KEY,
            account_id  TEXT    NOT NULL,
            folder_id   TEXT    NOT NULL,
            subject     TEXT,
            from_email  TEXT,
            is_snoozed  INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS drafts (
            id          TEXT    NOT NULL PRIMARY KEY,
            account_id  TEXT    NOT NULL
        );

        CREATE TABLE IF NOT EXISTS snoozed_emails (
            id                  TEXT    NOT NULL PRIMARY KEY,
            email_id            TEXT    NOT NULL,
            account_id          TEXT    NOT NULL,
            original_folder_id  TEXT    NOT NULL,
            snooze_until        INTEGER NOT NULL,
            restored            INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS scheduled_emails (
            id                TEXT    NOT NULL PRIMARY KEY,
            account_id        TEXT    NOT NULL,
            to_addrs          TEXT    NOT NULL,
            cc_addrs          TEXT,
            bcc_addrs         TEXT,
            subject           TEXT    NOT NULL DEFAULT '',
            body_html         TEXT    NOT NULL DEFAULT '',
            attachments_json  TEXT,
            draft_id          TEXT,
            send_at           INTEGER NOT NULL,
            status            TEXT    NOT NULL DEFAULT 'pending',
            retry_count       INTEGER NOT NULL DEFAULT 0,
            error_message     TEXT
        );

        CREATE TABLE IF NOT EXISTS reminders (
            id            TEXT    NOT NULL PRIMARY KEY,
            email_id      TEXT    NOT NULL,
            account_id    TEXT    NOT NULL,
            remind_at     INTEGER NOT NULL,
            is_triggered  INTEGER NOT NULL DEFAULT 0
        );

        -- Due polling: WHERE <time> <= ? AND <not processed>
        CREATE INDEX IF NOT EXISTS idx_snoozed_due
            ON snoozed_emails (restored, snooze_until);
        CREATE INDEX IF NOT EXISTS idx_scheduled_due
            ON scheduled_emails (status, send_at);
        CREATE INDEX IF NOT EXISTS idx_reminders_due
            ON reminders (is_triggered, remind_at);
        ",
    )?;
    Ok(())
}
