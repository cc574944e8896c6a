use thiserror::Error;

use crate::mailer::MailerError;

/// Default number of failed attempts after which a send is marked failed.
pub const MAX_RETRIES: u32 = 3;

/// Why one delivery attempt failed.
///
/// `Display` is the canonical short message persisted in
/// `scheduled_emails.error_message` and passed to the host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryFailure {
    /// The mailer returned `Ok(false)`.
    #[error("SMTP send returned false")]
    Rejected,

    /// The mailer returned an error.
    #[error("{0}")]
    Transport(String),

    /// The mailer did not answer within the send timeout.
    #[error("delivery timed out after {secs}s")]
    TimedOut { secs: u64 },
}

impl From<MailerError> for DeliveryFailure {
    fn from(e: MailerError) -> Self {
        DeliveryFailure::Transport(e.to_string())
    }
}

/// What to do with a send after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to `pending`; picked up again on the next poll. Not reported.
    Retry { retry_count: u32 },
    /// Terminal `failed`; reported to the host.
    GiveUp {
        retry_count: u32,
        error_message: String,
    },
}

/// Bounded retry: the attempt that brings `retry_count` to `max_retries`
/// is the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Decide the next state for a send that failed with `failure` while at
    /// `retry_count` previous failures.
    pub fn decide(&self, retry_count: u32, failure: &DeliveryFailure) -> RetryDecision {
        let next = retry_count.saturating_add(1);
        if next >= self.max_retries {
            RetryDecision::GiveUp {
                retry_count: next,
                error_message: failure.to_string(),
            }
        } else {
            RetryDecision::Retry { retry_count: next }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(MAX_RETRIES)
    }
}
