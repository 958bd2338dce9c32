//! SMTP submission through lettre.

use crate::config::SmtpEndpoint;
use crate::error::SendError;
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

/// Upper bound for a single SMTP command.
pub const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// A plain-text message to submit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
}

/// Submits messages to an SMTP endpoint.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, endpoint: &SmtpEndpoint, message: &OutgoingMessage)
    -> Result<(), SendError>;
}

/// [`MailSender`] backed by a fresh lettre transport per submission.
#[derive(Clone, Debug, Default)]
pub struct LettreSender;

impl LettreSender {
    fn transport(endpoint: &SmtpEndpoint) -> Result<AsyncSmtpTransport<Tokio1Executor>, SendError> {
        let builder = if endpoint.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&endpoint.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&endpoint.host)
        }
        .map_err(|e| SendError::Transport(e.to_string()))?;

        let creds = Credentials::new(endpoint.user.clone(), endpoint.pass.clone());
        Ok(builder
            .port(endpoint.port)
            .credentials(creds)
            .timeout(Some(SMTP_TIMEOUT))
            .build())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, SendError> {
    address
        .parse::<Mailbox>()
        .map_err(|e| SendError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

/// Build the lettre message for `message`, sent from `from`.
pub fn build_message(from: &str, message: &OutgoingMessage) -> Result<Message, SendError> {
    Message::builder()
        .from(parse_mailbox(from)?)
        .to(parse_mailbox(&message.to)?)
        .subject(message.subject.as_str())
        .header(ContentType::TEXT_PLAIN)
        .body(message.text.clone())
        .map_err(|e| SendError::Message(e.to_string()))
}

#[async_trait]
impl MailSender for LettreSender {
    #[tracing::instrument(skip(self, endpoint, message), fields(smtp = %format!("{}:{}", endpoint.host, endpoint.port), to = %message.to))]
    async fn send(
        &self,
        endpoint: &SmtpEndpoint,
        message: &OutgoingMessage,
    ) -> Result<(), SendError> {
        tracing::info!(name = "clients.smtp.send", "Sending email");

        let email = build_message(&endpoint.from, message)?;
        let transport = Self::transport(endpoint)?;
        transport
            .send(email)
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;

        Ok(())
    }
}
