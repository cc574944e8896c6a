use std::collections::HashMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use lettre::{
    message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use mailbell_core::AccountConfig;
use mailbell_scheduler::{Mailer, MailerError, OutgoingEmail};
use tracing::{debug, warn};

const IMPLICIT_TLS_PORT: u16 = 465;

struct SmtpAccount {
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

/// SMTP delivery through lettre, one pooled transport per configured account.
pub struct SmtpMailer {
    accounts: HashMap<String, SmtpAccount>,
}

impl SmtpMailer {
    /// Build transports for every account. Connections are opened lazily on
    /// first send.
    pub fn new(accounts: &[AccountConfig]) -> anyhow::Result<Self> {
        let mut map = HashMap::with_capacity(accounts.len());
        for account in accounts {
            let from: Mailbox = account.email.parse()?;
            let creds = Credentials::new(account.username.clone(), account.password.clone());

            // 465 is SMTPS (TLS from the first byte); anything else upgrades via STARTTLS.
            let builder = if account.smtp_port == IMPLICIT_TLS_PORT {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&account.smtp_host)?
            } else {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&account.smtp_host)?
            };
            let transport = builder
                .port(account.smtp_port)
                .credentials(creds)
                .build();

            debug!(account_id = %account.id, host = %account.smtp_host, port = account.smtp_port, "smtp account configured");
            map.insert(account.id.clone(), SmtpAccount { from, transport });
        }
        Ok(Self { accounts: map })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_email(&self, email: &OutgoingEmail) -> Result<bool, MailerError> {
        let Some(account) = self.accounts.get(&email.account_id) else {
            warn!(account_id = %email.account_id, "no SMTP account configured");
            return Ok(false);
        };
        let message = build_message(&account.from, email)?;
        account.transport.send(message).await?;
        Ok(true)
    }
}

/// Render an outgoing email as a MIME message: HTML body plus attachments.
fn build_message(from: &Mailbox, email: &OutgoingEmail) -> Result<Message, MailerError> {
    let mut builder = Message::builder().from(from.clone()).subject(&email.subject);
    for addr in &email.to {
        builder = builder.to(addr.parse()?);
    }
    for addr in email.cc.iter().flatten() {
        builder = builder.cc(addr.parse()?);
    }
    for addr in email.bcc.iter().flatten() {
        builder = builder.bcc(addr.parse()?);
    }

    let mut body = MultiPart::mixed().singlepart(SinglePart::html(email.html.clone()));
    for attachment in email.attachments.iter().flatten() {
        let bytes = STANDARD
            .decode(&attachment.content)
            .map_err(|e| format!("attachment {}: {e}", attachment.filename))?;
        let content_type = ContentType::parse(&attachment.content_type)
            .or_else(|_| ContentType::parse("application/octet-stream"))?;
        body = body.singlepart(Attachment::new(attachment.filename.clone()).body(bytes, content_type));
    }

    Ok(builder.multipart(body)?)
}
