use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::{
    callbacks::Notifier,
    error::Result,
    mailer::Mailer,
    retry::{DeliveryFailure, RetryDecision, RetryPolicy},
    store::MailStore,
    types::{Attachment, DispatchSummary, OutgoingEmail, ScheduledSendRow},
};

/// A delivery result whose storage write has not landed yet.
///
/// The row stays `sending` until the write succeeds, so it is neither
/// re-delivered nor reported in the meantime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SendOutcome {
    Sent {
        id: String,
        draft_id: Option<String>,
    },
    Retry {
        id: String,
        retry_count: u32,
    },
    Failed {
        id: String,
        retry_count: u32,
        error_message: String,
    },
}

impl SendOutcome {
    fn id(&self) -> &str {
        match self {
            SendOutcome::Sent { id, .. }
            | SendOutcome::Retry { id, .. }
            | SendOutcome::Failed { id, .. } => id,
        }
    }
}

/// Everything the send pass needs besides the store.
pub(crate) struct Dispatcher<'a> {
    pub store: &'a MailStore,
    pub mailer: &'a dyn Mailer,
    pub retry: RetryPolicy,
    pub send_timeout: Duration,
    pub notifier: &'a Notifier,
    /// Outcomes from earlier ticks whose write failed; settled first.
    pub unsettled: &'a Mutex<Vec<SendOutcome>>,
}

impl Dispatcher<'_> {
    /// Deliver every due scheduled send, one at a time in `send_at` order.
    ///
    /// Delivery failures never escape: they go through the retry policy.
    /// Storage errors end the pass and are returned. An outcome that could
    /// not be written is kept and written again on the next pass.
    pub(crate) async fn dispatch_due(&self, now: DateTime<Utc>) -> Result<DispatchSummary> {
        let mut summary = DispatchSummary::default();
        self.settle_unsettled(&mut summary)?;

        let due = self.store.due_scheduled_sends(now)?;
        if due.is_empty() {
            debug!("no scheduled sends due");
            return Ok(summary);
        }

        for row in due {
            // Claim first so an overlapping tick cannot send the same row.
            if !self.store.claim_send(&row.id)? {
                debug!(scheduled_id = %row.id, "scheduled send already claimed, skipping");
                summary.skipped += 1;
                continue;
            }

            let email = build_outgoing(&row);
            let outcome = match self.deliver(&email).await {
                Ok(()) => SendOutcome::Sent {
                    id: row.id.clone(),
                    draft_id: row.draft_id.clone(),
                },
                Err(failure) => match self.retry.decide(row.retry_count, &failure) {
                    RetryDecision::Retry { retry_count } => {
                        warn!(
                            scheduled_id = %row.id,
                            attempt = retry_count,
                            "scheduled send failed, will retry: {failure}"
                        );
                        SendOutcome::Retry {
                            id: row.id.clone(),
                            retry_count,
                        }
                    }
                    RetryDecision::GiveUp {
                        retry_count,
                        error_message,
                    } => SendOutcome::Failed {
                        id: row.id.clone(),
                        retry_count,
                        error_message,
                    },
                },
            };

            if let Err(e) = self.settle(&outcome, &mut summary) {
                error!(scheduled_id = %row.id, "could not record send outcome, will retry the write: {e}");
                self.unsettled().push(outcome);
                return Err(e);
            }
        }
        Ok(summary)
    }

    /// Write outcomes parked by earlier passes. Stops at the first failure,
    /// keeping it and everything after it for the next pass.
    fn settle_unsettled(&self, summary: &mut DispatchSummary) -> Result<()> {
        let parked = std::mem::take(&mut *self.unsettled());
        let mut parked = parked.into_iter();
        while let Some(outcome) = parked.next() {
            if let Err(e) = self.settle(&outcome, summary) {
                let mut unsettled = self.unsettled();
                unsettled.push(outcome);
                unsettled.extend(parked);
                return Err(e);
            }
            debug!(scheduled_id = %outcome.id(), "parked send outcome recorded");
        }
        Ok(())
    }

    /// Persist one outcome, then notify and count it.
    fn settle(&self, outcome: &SendOutcome, summary: &mut DispatchSummary) -> Result<()> {
        match outcome {
            SendOutcome::Sent { id, draft_id } => {
                self.store.complete_send(id, draft_id.as_deref())?;
                info!(scheduled_id = %id, "scheduled send delivered");
                self.notifier.send_result(id, true, None);
                summary.sent += 1;
            }
            SendOutcome::Retry { id, retry_count } => {
                self.store.requeue_send(id, *retry_count)?;
                summary.retried += 1;
            }
            SendOutcome::Failed {
                id,
                retry_count,
                error_message,
            } => {
                self.store.fail_send(id, *retry_count, error_message)?;
                error!(
                    scheduled_id = %id,
                    attempts = retry_count,
                    "scheduled send failed permanently: {error_message}"
                );
                self.notifier.send_result(id, false, Some(error_message));
                summary.failed += 1;
            }
        }
        Ok(())
    }

    fn unsettled(&self) -> MutexGuard<'_, Vec<SendOutcome>> {
        self.unsettled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One bounded delivery attempt, folded into a single failure type.
    async fn deliver(&self, email: &OutgoingEmail) -> std::result::Result<(), DeliveryFailure> {
        match tokio::time::timeout(self.send_timeout, self.mailer.send_email(email)).await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(DeliveryFailure::Rejected),
            Ok(Err(e)) => Err(DeliveryFailure::from(e)),
            Err(_) => Err(DeliveryFailure::TimedOut {
                secs: self.send_timeout.as_secs(),
            }),
        }
    }
}

/// Assemble the delivery payload for a scheduled send.
pub(crate) fn build_outgoing(row: &ScheduledSendRow) -> OutgoingEmail {
    OutgoingEmail {
        account_id: row.account_id.clone(),
        to: parse_recipients(&row.to),
        subject: row.subject.clone(),
        html: row.body_html.clone(),
        cc: parse_optional_recipients(row.cc.as_deref()),
        bcc: parse_optional_recipients(row.bcc.as_deref()),
        attachments: parse_attachments(&row.id, row.attachments_json.as_deref()),
    }
}

/// Split a comma-separated recipient list, trimming and dropping empty entries.
pub fn parse_recipients(field: &str) -> Vec<String> {
    field
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Like [`parse_recipients`], but `None` when there is nothing to send to.
pub fn parse_optional_recipients(field: Option<&str>) -> Option<Vec<String>> {
    let list = parse_recipients(field?);
    (!list.is_empty()).then_some(list)
}

/// Decode stored attachments. Malformed JSON is logged and treated as absent
/// so it never blocks the send.
fn parse_attachments(scheduled_id: &str, json: Option<&str>) -> Option<Vec<Attachment>> {
    let json = json?;
    match serde_json::from_str(json) {
        Ok(list) => Some(list),
        Err(e) => {
            warn!(%scheduled_id, "ignoring malformed attachments_json: {e}");
            None
        }
    }
}
