use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{params, OptionalExtension};
use tracing::info;
use uuid::Uuid;

use crate::{
    dispatch::parse_recipients,
    error::{Result, SchedulerError},
    store::MailStore,
    types::{NewScheduledSend, ScheduledSendRow, SendStatus},
};

/// Host-side management of snoozes, scheduled sends and reminders.
///
/// Creates and cancels the rows the engine later processes. Shares the
/// engine's [`MailStore`], so writes are visible to the next tick.
#[derive(Clone)]
pub struct SchedulerHandle {
    store: MailStore,
}

impl SchedulerHandle {
    pub fn new(store: MailStore) -> Self {
        Self { store }
    }

    /// Snooze an email until `until`, remembering its current folder.
    ///
    /// Snoozing an already-snoozed email moves its wake-up time and returns
    /// the existing entry's ID.
    pub fn snooze_email(&self, email_id: &str, until: DateTime<Utc>) -> Result<String> {
        let mut conn = self.store.connection()?;
        let tx = conn.transaction()?;

        let (account_id, folder_id): (String, String) = tx
            .query_row(
                "SELECT account_id, folder_id FROM emails WHERE id = ?1",
                [email_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or_else(|| SchedulerError::NotFound {
                kind: "email",
                id: email_id.to_string(),
            })?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM snoozed_emails WHERE email_id = ?1 AND restored = 0",
                [email_id],
                |row| row.get(0),
            )
            .optional()?;

        let id = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE snoozed_emails SET snooze_until = ?1 WHERE id = ?2",
                    params![until.timestamp_millis(), id],
                )?;
                id
            }
            None => {
                let id = Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO snoozed_emails
                     (id, email_id, account_id, original_folder_id, snooze_until, restored)
                     VALUES (?1, ?2, ?3, ?4, ?5, 0)",
                    params![id, email_id, account_id, folder_id, until.timestamp_millis()],
                )?;
                id
            }
        };
        tx.execute("UPDATE emails SET is_snoozed = 1 WHERE id = ?1", [email_id])?;
        tx.commit()?;

        info!(snooze_id = %id, %email_id, until = %until.to_rfc3339(), "email snoozed");
        Ok(id)
    }

    /// Wake a snoozed email now. The host is not notified; it asked for this.
    pub fn cancel_snooze(&self, snooze_id: &str) -> Result<()> {
        let entry = self.store.unrestored_snooze(snooze_id)?;
        let entry = entry.ok_or_else(|| SchedulerError::NotFound {
            kind: "snooze",
            id: snooze_id.to_string(),
        })?;

        self.store.restore_snooze(&entry)?;
        info!(%snooze_id, email_id = %entry.email_id, "snooze cancelled");
        Ok(())
    }

    /// Queue an email for delivery at `send_at`.
    pub fn schedule_send(&self, new: NewScheduledSend) -> Result<ScheduledSendRow> {
        if parse_recipients(&new.to).is_empty() {
            return Err(SchedulerError::InvalidInput(
                "a scheduled send needs at least one recipient".to_string(),
            ));
        }
        let attachments_json = new
            .attachments
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| SchedulerError::InvalidInput(format!("attachments: {e}")))?;
        // Stored at millisecond precision; return exactly what a read gives back.
        let send_at = new.send_at.trunc_subsecs(3);
        let id = Uuid::new_v4().to_string();

        let conn = self.store.connection()?;
        conn.execute(
            "INSERT INTO scheduled_emails
             (id, account_id, to_addrs, cc_addrs, bcc_addrs, subject, body_html,
              attachments_json, draft_id, send_at, status, retry_count, error_message)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,0,NULL)",
            params![
                id,
                new.account_id,
                new.to,
                new.cc,
                new.bcc,
                new.subject,
                new.body_html,
                attachments_json,
                new.draft_id,
                send_at.timestamp_millis(),
                SendStatus::Pending,
            ],
        )?;
        info!(scheduled_id = %id, send_at = %send_at.to_rfc3339(), "send scheduled");

        Ok(ScheduledSendRow {
            id,
            account_id: new.account_id,
            to: new.to,
            cc: new.cc,
            bcc: new.bcc,
            subject: new.subject,
            body_html: new.body_html,
            attachments_json,
            draft_id: new.draft_id,
            send_at,
            status: SendStatus::Pending,
            retry_count: 0,
            error_message: None,
        })
    }

    /// Remove a send that has not been picked up yet.
    ///
    /// Fails with `InvalidState` once the send is in flight or finished.
    pub fn cancel_scheduled_send(&self, id: &str) -> Result<()> {
        let n = {
            let conn = self.store.connection()?;
            conn.execute(
                "DELETE FROM scheduled_emails WHERE id = ?1 AND status = ?2",
                params![id, SendStatus::Pending],
            )?
        };
        if n == 1 {
            info!(scheduled_id = %id, "scheduled send cancelled");
            return Ok(());
        }
        match self.store.get_scheduled_send(id)? {
            Some(row) => Err(SchedulerError::InvalidState {
                id: id.to_string(),
                status: row.status.to_string(),
            }),
            None => Err(SchedulerError::NotFound {
                kind: "scheduled send",
                id: id.to_string(),
            }),
        }
    }

    pub fn get_scheduled_send(&self, id: &str) -> Result<Option<ScheduledSendRow>> {
        self.store.get_scheduled_send(id)
    }

    pub fn list_scheduled_sends(&self, account_id: &str) -> Result<Vec<ScheduledSendRow>> {
        self.store.list_scheduled_sends(account_id)
    }

    pub fn add_reminder(
        &self,
        email_id: &str,
        account_id: &str,
        remind_at: DateTime<Utc>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let conn = self.store.connection()?;
        conn.execute(
            "INSERT INTO reminders (id, email_id, account_id, remind_at, is_triggered)
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![id, email_id, account_id, remind_at.timestamp_millis()],
        )?;
        info!(reminder_id = %id, %email_id, "reminder added");
        Ok(id)
    }

    /// Remove a reminder that has not fired yet.
    pub fn cancel_reminder(&self, id: &str) -> Result<()> {
        let conn = self.store.connection()?;
        let n = conn.execute(
            "DELETE FROM reminders WHERE id = ?1 AND is_triggered = 0",
            [id],
        )?;
        if n == 0 {
            return Err(SchedulerError::NotFound {
                kind: "reminder",
                id: id.to_string(),
            });
        }
        info!(reminder_id = %id, "reminder cancelled");
        Ok(())
    }
}
