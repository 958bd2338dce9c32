use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("Failed to build message: {0}")]
    Message(String),
    #[error("SMTP transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("Timeout after {0:?} while connecting")]
    ConnectTimeout(Duration),
    #[error("IMAP {command} timed out after {after:?}")]
    CommandTimeout {
        command: &'static str,
        after: Duration,
    },
    #[error("Connection error: {0}")]
    Connect(String),
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("Invalid server name: {0}")]
    InvalidServerName(String),
    #[error("IMAP login failed: {0}")]
    Auth(String),
    #[error("IMAP protocol error: {0}")]
    Protocol(String),
}

/// Why a probe failed. Only the display text ends up in a check result.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Send(#[from] SendError),
    #[error(transparent)]
    Mailbox(#[from] MailboxError),
    #[error("Message not received within timeout ({0:?})")]
    NotReceived(Duration),
    #[error("Check did not complete within {0:?}")]
    TimedOut(Duration),
}
