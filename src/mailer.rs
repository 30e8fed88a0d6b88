//! Outgoing mail delivery.
//!
//! The composer hands one [`OutgoingMail`] per recipient to a [`Mailer`].
//! Transport concerns (SMTP, queues, retries) live behind the trait.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use crate::types::User;

/// Errors from a mail backend.
#[derive(Debug, thiserror::Error)]
pub enum MailerError {
    /// The backend refused or failed to hand off the message.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// The recipient address is unusable.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// An attachment shipped with a mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailAttachment {
    /// Name shown to the recipient.
    pub name: String,
    /// Location of the file on disk.
    pub path: PathBuf,
}

/// One message to one recipient, ready for transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    /// Recipient.
    pub to: User,
    /// Sender.
    pub from: User,
    /// Final subject, prefix included.
    pub subject: String,
    /// Plain-text alternative.
    pub plain_body: String,
    /// HTML alternative.
    pub html_body: String,
    /// Bundled attachments, if any.
    pub attachment: Option<MailAttachment>,
}

/// A mail transport.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver one mail.
    ///
    /// # Errors
    ///
    /// Returns [`MailerError`] if the mail could not be handed off.
    async fn deliver(&self, mail: &OutgoingMail) -> Result<(), MailerError>;
}

/// Writes each delivery to the log instead of sending it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn deliver(&self, mail: &OutgoingMail) -> Result<(), MailerError> {
        if mail.to.email.trim().is_empty() {
            return Err(MailerError::InvalidAddress(format!("user {}", mail.to.id)));
        }
        info!(
            to = %mail.to.email,
            from = %mail.from.email,
            subject = %mail.subject,
            format = mail.to.mail_format.as_str(),
            attachment = mail.attachment.as_ref().map(|a| a.name.as_str()),
            "mail delivered"
        );
        Ok(())
    }
}
