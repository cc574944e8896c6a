use async_trait::async_trait;

use crate::types::OutgoingEmail;

/// Error type returned by a [`Mailer`]. Rendered through `Display` when a
/// failed send is recorded.
pub type MailerError = Box<dyn std::error::Error + Send + Sync>;

/// Outbound delivery collaborator (SMTP or any other transport).
///
/// Implementations must be `Send + Sync` so the engine can hold one behind an
/// `Arc` and call it from its tick task.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver one email.
    ///
    /// `Ok(true)` means accepted for delivery. `Ok(false)` means the
    /// transport declined without an error of its own (e.g. no account is
    /// configured); the engine treats it as a failed attempt. Errors are
    /// failed attempts too.
    async fn send_email(&self, email: &OutgoingEmail) -> Result<bool, MailerError>;
}
