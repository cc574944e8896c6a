use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a scheduled send.
///
/// Transitions: `pending -> sending -> {sent | pending (retry) | failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    /// Waiting for `send_at`, or for the next retry.
    Pending,
    /// Claimed by a tick; delivery is in flight.
    Sending,
    /// Delivered. Terminal.
    Sent,
    /// Retry budget exhausted. Terminal.
    Failed,
}

impl SendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendStatus::Pending => "pending",
            SendStatus::Sending => "sending",
            SendStatus::Sent => "sent",
            SendStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SendStatus::Sent | SendStatus::Failed)
    }
}

impl std::fmt::Display for SendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SendStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SendStatus::Pending),
            "sending" => Ok(SendStatus::Sending),
            "sent" => Ok(SendStatus::Sent),
            "failed" => Ok(SendStatus::Failed),
            other => Err(format!("unknown send status: {other}")),
        }
    }
}

impl FromSql for SendStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

impl ToSql for SendStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

/// A due snooze entry, as read by the snooze restorer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnoozedRow {
    pub id: String,
    pub email_id: String,
    pub account_id: String,
    /// Folder the email is moved back into on restore.
    pub original_folder_id: String,
    pub snooze_until: DateTime<Utc>,
}

/// A persisted scheduled send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledSendRow {
    pub id: String,
    pub account_id: String,
    /// Comma-separated recipient list, as entered by the user.
    pub to: String,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    pub subject: String,
    pub body_html: String,
    /// JSON array of [`Attachment`]; parsed leniently at send time.
    pub attachments_json: Option<String>,
    /// Draft deleted together with the `sent` transition.
    pub draft_id: Option<String>,
    pub send_at: DateTime<Utc>,
    pub status: SendStatus,
    pub retry_count: u32,
    /// Set only when the send reaches `failed`.
    pub error_message: Option<String>,
}

/// A due reminder joined with its email's display fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderRow {
    pub id: String,
    pub email_id: String,
    pub account_id: String,
    pub remind_at: DateTime<Utc>,
    /// `None` when the email has no subject or no longer exists.
    pub subject: Option<String>,
    pub from_email: Option<String>,
}

/// File attached to an outgoing email.
///
/// Stored in `scheduled_emails.attachments_json` with camelCase keys
/// (`{"filename", "content", "contentType"}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub filename: String,
    /// Base64-encoded file body.
    pub content: String,
    pub content_type: String,
}

/// Everything the delivery collaborator needs for one send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingEmail {
    pub account_id: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
    /// `None` rather than empty when the source field had no addresses.
    pub cc: Option<Vec<String>>,
    pub bcc: Option<Vec<String>>,
    pub attachments: Option<Vec<Attachment>>,
}

/// Input for [`SchedulerHandle::schedule_send`](crate::handle::SchedulerHandle::schedule_send).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewScheduledSend {
    pub account_id: String,
    pub to: String,
    #[serde(default)]
    pub cc: Option<String>,
    #[serde(default)]
    pub bcc: Option<String>,
    pub subject: String,
    pub body_html: String,
    #[serde(default)]
    pub attachments: Option<Vec<Attachment>>,
    #[serde(default)]
    pub draft_id: Option<String>,
    pub send_at: DateTime<Utc>,
}

/// The three independent job classes driven by each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    SnoozeRestore,
    ScheduledSend,
    Reminder,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobKind::SnoozeRestore => "snooze_restore",
            JobKind::ScheduledSend => "scheduled_send",
            JobKind::Reminder => "reminder",
        };
        write!(f, "{s}")
    }
}

/// Outcome counts of one scheduled-send pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub sent: usize,
    /// Failed but returned to `pending` for another attempt.
    pub retried: usize,
    /// Failed terminally.
    pub failed: usize,
    /// Due rows another tick claimed first.
    pub skipped: usize,
}

/// What a single tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// True when another tick held the single-flight guard; nothing ran.
    pub skipped: bool,
    pub snoozes_restored: usize,
    pub sends: DispatchSummary,
    pub reminders_triggered: usize,
    /// Job classes whose pass ended in an error this tick.
    pub failed_jobs: Vec<JobKind>,
}

impl TickReport {
    pub(crate) fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    /// True when the tick neither changed state nor hit an error.
    pub fn is_idle(&self) -> bool {
        self.snoozes_restored == 0
            && self.sends == DispatchSummary::default()
            && self.reminders_triggered == 0
            && self.failed_jobs.is_empty()
    }
}
