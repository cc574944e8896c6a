// Shared test doubles and fixtures for the scheduler integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mailbell_core::SchedulerConfig;
use mailbell_scheduler::{
    Mailer, MailerError, MailStore, OutgoingEmail, SchedulerCallbacks, SchedulerEngine,
    SchedulerEvent,
};
use rusqlite::params;
use tokio::sync::Notify;

/// Lets a test hold a delivery open and observe that it started.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

#[derive(Clone)]
pub enum Outcome {
    Accept,
    Reject,
    Fail(&'static str),
    /// Never resolves; only the send timeout ends it.
    Hang,
    Block(Arc<Gate>),
}

/// Mailer that plays back a script of outcomes and records every email.
pub struct ScriptedMailer {
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    sent: Mutex<Vec<OutgoingEmail>>,
}

impl ScriptedMailer {
    pub fn new(script: Vec<Outcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback: Outcome::Accept,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn always(outcome: Outcome) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: outcome,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for ScriptedMailer {
    async fn send_email(&self, email: &OutgoingEmail) -> Result<bool, MailerError> {
        self.sent.lock().unwrap().push(email.clone());
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match outcome {
            Outcome::Accept => Ok(true),
            Outcome::Reject => Ok(false),
            Outcome::Fail(msg) => Err(msg.into()),
            Outcome::Hang => Ok(std::future::pending::<bool>().await),
            Outcome::Block(gate) => {
                gate.entered.notify_one();
                gate.release.notified().await;
                Ok(true)
            }
        }
    }
}

/// Records every notification in arrival order.
#[derive(Default)]
pub struct RecordingCallbacks {
    events: Mutex<Vec<SchedulerEvent>>,
}

impl RecordingCallbacks {
    pub fn events(&self) -> Vec<SchedulerEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl SchedulerCallbacks for RecordingCallbacks {
    fn on_snooze_restore(&self, email_id: &str, account_id: &str, folder_id: &str) {
        self.events.lock().unwrap().push(SchedulerEvent::SnoozeRestored {
            email_id: email_id.into(),
            account_id: account_id.into(),
            folder_id: folder_id.into(),
        });
    }

    fn on_reminder_due(&self, email_id: &str, account_id: &str, subject: &str, from_email: &str) {
        self.events.lock().unwrap().push(SchedulerEvent::ReminderDue {
            email_id: email_id.into(),
            account_id: account_id.into(),
            subject: subject.into(),
            from_email: from_email.into(),
        });
    }

    fn on_scheduled_send_result(&self, scheduled_id: &str, success: bool, error: Option<&str>) {
        self.events.lock().unwrap().push(SchedulerEvent::ScheduledSendResult {
            scheduled_id: scheduled_id.into(),
            success,
            error: error.map(String::from),
        });
    }
}

pub fn engine_with(
    mailer: Arc<ScriptedMailer>,
    config: SchedulerConfig,
) -> (SchedulerEngine, Arc<RecordingCallbacks>) {
    let store = MailStore::open_in_memory().unwrap();
    let engine = SchedulerEngine::new(store, mailer, config);
    let callbacks = Arc::new(RecordingCallbacks::default());
    engine.set_callbacks(callbacks.clone());
    (engine, callbacks)
}

pub fn engine(mailer: Arc<ScriptedMailer>) -> (SchedulerEngine, Arc<RecordingCallbacks>) {
    engine_with(mailer, SchedulerConfig::default())
}

pub fn past() -> DateTime<Utc> {
    Utc::now() - Duration::minutes(1)
}

pub fn future() -> DateTime<Utc> {
    Utc::now() + Duration::hours(1)
}

pub fn insert_email(store: &MailStore, id: &str, folder: &str, subject: Option<&str>, from: Option<&str>) {
    store
        .connection()
        .unwrap()
        .execute(
            "INSERT INTO emails (id, account_id, folder_id, subject, from_email, is_snoozed)
             VALUES (?1, 'a1', ?2, ?3, ?4, 0)",
            params![id, folder, subject, from],
        )
        .unwrap();
}

pub fn insert_snooze(store: &MailStore, id: &str, email_id: &str, folder: &str, until: DateTime<Utc>) {
    let conn = store.connection().unwrap();
    conn.execute(
        "INSERT INTO snoozed_emails (id, email_id, account_id, original_folder_id, snooze_until, restored)
         VALUES (?1, ?2, 'a1', ?3, ?4, 0)",
        params![id, email_id, folder, until.timestamp_millis()],
    )
    .unwrap();
    conn.execute("UPDATE emails SET is_snoozed = 1, folder_id = 'snoozed' WHERE id = ?1", [email_id])
        .unwrap();
}

pub struct SendFixture<'a> {
    pub id: &'a str,
    pub to: &'a str,
    pub cc: Option<&'a str>,
    pub bcc: Option<&'a str>,
    pub attachments_json: Option<&'a str>,
    pub draft_id: Option<&'a str>,
    pub send_at: DateTime<Utc>,
    pub status: &'a str,
    pub retry_count: i64,
}

impl<'a> SendFixture<'a> {
    pub fn due(id: &'a str) -> Self {
        Self {
            id,
            to: "x@example.com",
            cc: None,
            bcc: None,
            attachments_json: None,
            draft_id: None,
            send_at: past(),
            status: "pending",
            retry_count: 0,
        }
    }

    pub fn insert(&self, store: &MailStore) {
        store
            .connection()
            .unwrap()
            .execute(
                "INSERT INTO scheduled_emails
                 (id, account_id, to_addrs, cc_addrs, bcc_addrs, subject, body_html,
                  attachments_json, draft_id, send_at, status, retry_count)
                 VALUES (?1, 'a1', ?2, ?3, ?4, 'Hello', '<p>hi</p>', ?5, ?6, ?7, ?8, ?9)",
                params![
                    self.id,
                    self.to,
                    self.cc,
                    self.bcc,
                    self.attachments_json,
                    self.draft_id,
                    self.send_at.timestamp_millis(),
                    self.status,
                    self.retry_count,
                ],
            )
            .unwrap();
    }
}

pub fn insert_reminder(store: &MailStore, id: &str, email_id: &str, at: DateTime<Utc>) {
    store
        .connection()
        .unwrap()
        .execute(
            "INSERT INTO reminders (id, email_id, account_id, remind_at, is_triggered)
             VALUES (?1, ?2, 'a1', ?3, 0)",
            params![id, email_id, at.timestamp_millis()],
        )
        .unwrap();
}

pub fn query_i64(store: &MailStore, sql: &str) -> i64 {
    store.connection().unwrap().query_row(sql, [], |r| r.get(0)).unwrap()
}

pub fn query_string(store: &MailStore, sql: &str) -> Option<String> {
    store.connection().unwrap().query_row(sql, [], |r| r.get(0)).unwrap()
}
