//! Thin protocol adapters the probes talk through.
//!
//! - `smtp` - message submission ([`MailSender`])
//! - `imap` - mailbox access ([`MailboxConnector`], [`MailboxSession`])
//! - `tls` - shared rustls client configuration

pub mod imap;
pub mod smtp;
pub mod tls;

pub use imap::{ImapConnector, MailboxConnector, MailboxSession, RECENT_WINDOW};
pub use smtp::{LettreSender, MailSender, OutgoingMessage};
