//! The four checks the daemon performs and the endpoints each one uses.

use crate::checks::roundtrip::{PollSettings, Roundtrip, check_connectivity};
use crate::checks::runner::{CheckResult, run_check};
use crate::clients::{MailSender, MailboxConnector};
use crate::config::{AppConfig, ImapEndpoint, SmtpEndpoint};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CheckKind {
    Login,
    Outbound,
    Inbound,
    Forwarding,
}

impl CheckKind {
    pub const ALL: [CheckKind; 4] = [
        CheckKind::Login,
        CheckKind::Outbound,
        CheckKind::Inbound,
        CheckKind::Forwarding,
    ];

    /// Roundtrip checks in execution order. Each only runs when the previous
    /// one passed.
    pub const ROUNDTRIP_ORDER: [CheckKind; 3] = [
        CheckKind::Forwarding,
        CheckKind::Outbound,
        CheckKind::Inbound,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CheckKind::Login => "login",
            CheckKind::Outbound => "outbound",
            CheckKind::Inbound => "inbound",
            CheckKind::Forwarding => "forwarding",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Something that can execute any of the named checks.
#[async_trait]
pub trait CheckSuite: Send + Sync {
    async fn run(&self, kind: CheckKind) -> CheckResult;
}

/// The production catalog: binds each [`CheckKind`] to its probe and
/// endpoints.
pub struct HealthChecks {
    config: Arc<AppConfig>,
    sender: Arc<dyn MailSender>,
    connector: Arc<dyn MailboxConnector>,
}

impl HealthChecks {
    pub fn new(
        config: Arc<AppConfig>,
        sender: Arc<dyn MailSender>,
        connector: Arc<dyn MailboxConnector>,
    ) -> Self {
        Self {
            config,
            sender,
            connector,
        }
    }

    pub async fn check_login(&self) -> CheckResult {
        run_check(CheckKind::Login.name(), |_ctx| {
            check_connectivity(self.connector.as_ref(), &self.config.local_imap)
        })
        .await
    }

    pub async fn check_outbound(&self) -> CheckResult {
        let config = &self.config;
        self.check_roundtrip(
            CheckKind::Outbound,
            &config.local_smtp,
            &config.external_imap,
            &config.test_addresses.outbound_to,
        )
        .await
    }

    pub async fn check_inbound(&self) -> CheckResult {
        let config = &self.config;
        self.check_roundtrip(
            CheckKind::Inbound,
            &config.external_smtp,
            &config.local_imap,
            &config.test_addresses.inbound_to,
        )
        .await
    }

    pub async fn check_forwarding(&self) -> CheckResult {
        let config = &self.config;
        self.check_roundtrip(
            CheckKind::Forwarding,
            &config.external_smtp,
            &config.forwarding_imap,
            &config.test_addresses.forwarding_to,
        )
        .await
    }

    async fn check_roundtrip(
        &self,
        kind: CheckKind,
        smtp: &SmtpEndpoint,
        imap: &ImapEndpoint,
        recipient: &str,
    ) -> CheckResult {
        let roundtrip = Roundtrip {
            sender: self.sender.as_ref(),
            connector: self.connector.as_ref(),
            smtp,
            imap,
            recipient,
            settings: PollSettings {
                wait_timeout: self.config.timing.message_wait_timeout,
                poll_interval: self.config.timing.imap_poll_interval,
            },
        };
        run_check(kind.name(), |ctx| async move { roundtrip.run(kind.name(), ctx).await }).await
    }
}

#[async_trait]
impl CheckSuite for HealthChecks {
    #[tracing::instrument(skip(self))]
    async fn run(&self, kind: CheckKind) -> CheckResult {
        match kind {
            CheckKind::Login => self.check_login().await,
            CheckKind::Outbound => self.check_outbound().await,
            CheckKind::Inbound => self.check_inbound().await,
            CheckKind::Forwarding => self.check_forwarding().await,
        }
    }
}
