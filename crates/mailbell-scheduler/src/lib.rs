//! `mailbell-scheduler`: background engine for time-driven mailbox work.
//!
//! # Overview
//!
//! The [`SchedulerEngine`] wakes on a fixed poll interval and, in one tick,
//! runs three independent job classes against the SQLite mail store:
//!
//! | Job class        | Due when                      | Effect                                   |
//! |------------------|-------------------------------|------------------------------------------|
//! | Snooze restore   | `snooze_until <= now`         | Email moved back to its original folder  |
//! | Scheduled send   | `send_at <= now`, `pending`   | Delivered through the [`Mailer`], retried up to 3 times |
//! | Reminder         | `remind_at <= now`            | Host notified with subject and sender    |
//!
//! Results reach the host through [`SchedulerCallbacks`]. A failure in one
//! class is logged and never prevents the other two from running.

pub mod callbacks;
pub mod db;
mod dispatch;
pub mod engine;
pub mod error;
pub mod handle;
pub mod mailer;
mod reminder;
pub mod retry;
mod snooze;
pub mod store;
pub mod types;

pub use callbacks::{ChannelCallbacks, SchedulerCallbacks, SchedulerEvent};
pub use dispatch::{parse_optional_recipients, parse_recipients};
pub use engine::SchedulerEngine;
pub use error::{Result, SchedulerError};
pub use handle::SchedulerHandle;
pub use mailer::{Mailer, MailerError};
pub use retry::{DeliveryFailure, RetryDecision, RetryPolicy, MAX_RETRIES};
pub use store::MailStore;
pub use types::{
    Attachment, DispatchSummary, JobKind, NewScheduledSend, OutgoingEmail, ReminderRow,
    ScheduledSendRow, SendStatus, SnoozedRow, TickReport,
};
