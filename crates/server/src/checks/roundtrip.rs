//! Send-then-poll verification of a mail path, plus the plain connectivity
//! probe used for login checks.

use crate::checks::runner::ProbeContext;
use crate::clients::{MailSender, MailboxConnector, MailboxSession, OutgoingMessage, RECENT_WINDOW};
use crate::config::{ImapEndpoint, SmtpEndpoint};
use crate::error::{MailboxError, ProbeError};
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use tokio::time::Instant;

/// Subject line identifying one probe message.
pub fn probe_subject(check_name: &str, ctx: &ProbeContext) -> String {
    format!("[mail-healthcheck] {check_name} {}", ctx.id)
}

/// Body of a probe message.
pub fn probe_body(check_name: &str, ctx: &ProbeContext) -> String {
    let ts = ctx
        .started_at
        .format(&Rfc3339)
        .unwrap_or_else(|_| ctx.started_at.unix_timestamp().to_string());
    format!("healthcheck={check_name}\nuuid={}\nts={ts}\n", ctx.id)
}

/// Polling parameters for [`poll_for_subject`].
#[derive(Clone, Copy, Debug)]
pub struct PollSettings {
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
}

/// Connect, select the configured mailbox, close and log out.
#[tracing::instrument(skip_all, fields(imap = %format!("{}:{}", endpoint.host, endpoint.port)))]
pub async fn check_connectivity(
    connector: &dyn MailboxConnector,
    endpoint: &ImapEndpoint,
) -> Result<(), ProbeError> {
    tracing::info!(name = "checks.login.connect", "Checking IMAP connectivity");

    let mut session = connector.connect(endpoint).await?;
    let opened = session.open_mailbox(&endpoint.mailbox).await;
    if opened.is_ok() {
        let _ = session.close_mailbox().await;
    }
    let _ = session.logout().await;

    opened?;
    tracing::info!(name = "checks.login.passed", "IMAP connectivity check passed");
    Ok(())
}

/// Poll `endpoint` until a message with exactly `subject` shows up or the
/// wait timeout elapses. One connection is used for the whole poll and is
/// logged out on every exit path.
#[tracing::instrument(skip(connector, endpoint, settings), fields(imap = %format!("{}:{}", endpoint.host, endpoint.port)))]
pub async fn poll_for_subject(
    connector: &dyn MailboxConnector,
    endpoint: &ImapEndpoint,
    subject: &str,
    settings: PollSettings,
) -> Result<bool, MailboxError> {
    tracing::info!(name = "checks.roundtrip.poll", "Searching for message");

    let deadline = Instant::now() + settings.wait_timeout;
    let mut session = connector.connect(endpoint).await?;

    let outcome = poll_session(session.as_mut(), &endpoint.mailbox, subject, deadline, settings).await;

    if let Err(e) = session.logout().await {
        tracing::debug!(name = "checks.roundtrip.logout_failed", error = %e, "IMAP logout failed");
    }
    outcome
}

async fn poll_session(
    session: &mut dyn MailboxSession,
    mailbox: &str,
    subject: &str,
    deadline: Instant,
    settings: PollSettings,
) -> Result<bool, MailboxError> {
    while Instant::now() < deadline {
        let exists = session.open_mailbox(mailbox).await?;

        let found = match session.search_subject(subject).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(
                    name = "checks.roundtrip.search_fallback",
                    error = %e,
                    "IMAP SEARCH failed, scanning recent envelopes"
                );
                session
                    .recent_subjects(exists, RECENT_WINDOW)
                    .await?
                    .iter()
                    .any(|s| s == subject)
            }
        };

        let _ = session.close_mailbox().await;

        if found {
            tracing::info!(name = "checks.roundtrip.found", subject, "Found message");
            return Ok(true);
        }

        tokio::time::sleep(settings.poll_interval).await;
    }

    tracing::warn!(name = "checks.roundtrip.not_found", subject, "Message not found within timeout");
    Ok(false)
}

/// Wiring of one roundtrip: where to send, where to look, and to whom.
pub struct Roundtrip<'a> {
    pub sender: &'a dyn MailSender,
    pub connector: &'a dyn MailboxConnector,
    pub smtp: &'a SmtpEndpoint,
    pub imap: &'a ImapEndpoint,
    pub recipient: &'a str,
    pub settings: PollSettings,
}

impl Roundtrip<'_> {
    /// Send a uniquely tagged message and wait for it to arrive.
    pub async fn run(&self, check_name: &str, ctx: ProbeContext) -> Result<(), ProbeError> {
        let subject = probe_subject(check_name, &ctx);
        let message = OutgoingMessage {
            to: self.recipient.to_string(),
            subject: subject.clone(),
            text: probe_body(check_name, &ctx),
        };

        self.sender.send(self.smtp, &message).await?;

        let found = poll_for_subject(self.connector, self.imap, &subject, self.settings).await?;
        if !found {
            return Err(ProbeError::NotReceived(self.settings.wait_timeout));
        }
        Ok(())
    }
}
