//! IMAP access through async-imap.
//!
//! Probes only need a narrow slice of IMAP: select a mailbox, look for a
//! subject, close and log out. That slice is the [`MailboxSession`] trait so
//! the probe logic can be driven by fakes in tests.
//!
//! Every connection is encrypted before credentials are sent: implicit TLS
//! for secure endpoints, a mandatory STARTTLS upgrade for the others. Each
//! command, the greeting included, is bounded by the connector's command
//! timeout so a stalled server cannot hold a check open.

use crate::clients::tls::shared_tls_config;
use crate::config::ImapEndpoint;
use crate::error::MailboxError;
use async_imap::{Client, Session};
use async_trait::async_trait;
use futures::TryStreamExt;
use rustls_pki_types::ServerName;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

/// Timeout for establishing the TCP/TLS connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on a single IMAP command.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// How many of the newest messages the envelope fallback looks at.
pub const RECENT_WINDOW: u32 = 100;

/// An authenticated IMAP connection.
#[async_trait]
pub trait MailboxSession: Send {
    /// Select `mailbox`, returning its message count.
    async fn open_mailbox(&mut self, mailbox: &str) -> Result<u32, MailboxError>;

    /// Server-side search of the selected mailbox for `subject`.
    async fn search_subject(&mut self, subject: &str) -> Result<bool, MailboxError>;

    /// Subjects of the newest `window` messages of the selected mailbox,
    /// which holds `exists` messages.
    async fn recent_subjects(&mut self, exists: u32, window: u32)
    -> Result<Vec<String>, MailboxError>;

    async fn close_mailbox(&mut self) -> Result<(), MailboxError>;

    async fn logout(&mut self) -> Result<(), MailboxError>;
}

/// Opens authenticated sessions against an IMAP endpoint.
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &ImapEndpoint,
    ) -> Result<Box<dyn MailboxSession>, MailboxError>;
}

type ImapTls = TlsStream<TcpStream>;

/// [`MailboxConnector`] speaking IMAP over TLS.
#[derive(Clone, Debug)]
pub struct ImapConnector {
    command_timeout: Duration,
}

impl Default for ImapConnector {
    fn default() -> Self {
        Self::with_command_timeout(COMMAND_TIMEOUT)
    }
}

impl ImapConnector {
    pub fn with_command_timeout(command_timeout: Duration) -> Self {
        Self { command_timeout }
    }

    async fn open_tcp(endpoint: &ImapEndpoint) -> Result<TcpStream, MailboxError> {
        let addr = format!("{}:{}", endpoint.host, endpoint.port);
        timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| MailboxError::ConnectTimeout(CONNECT_TIMEOUT))?
            .map_err(|e| MailboxError::Connect(e.to_string()))
    }

    async fn wrap_tls(endpoint: &ImapEndpoint, tcp: TcpStream) -> Result<ImapTls, MailboxError> {
        let connector = TlsConnector::from(shared_tls_config());
        let domain = ServerName::try_from(endpoint.host.clone())
            .map_err(|_| MailboxError::InvalidServerName(endpoint.host.clone()))?;
        timeout(CONNECT_TIMEOUT, connector.connect(domain, tcp))
            .await
            .map_err(|_| MailboxError::ConnectTimeout(CONNECT_TIMEOUT))?
            .map_err(|e| MailboxError::Tls(e.to_string()))
    }

    /// An unauthenticated client whose connection is already encrypted.
    async fn open_client(&self, endpoint: &ImapEndpoint) -> Result<Client<ImapTls>, MailboxError> {
        let tcp = Self::open_tcp(endpoint).await?;

        if endpoint.secure {
            let tls = Self::wrap_tls(endpoint, tcp).await?;
            let mut client = Client::new(tls);
            read_greeting(&mut client, self.command_timeout).await?;
            return Ok(client);
        }

        let mut plain = Client::new(tcp);
        read_greeting(&mut plain, self.command_timeout).await?;
        bounded(
            self.command_timeout,
            "STARTTLS",
            plain.run_command_and_check_ok("STARTTLS", None),
        )
        .await
        .map_err(|e| match e {
            MailboxError::Protocol(reason) => {
                MailboxError::Tls(format!("server refused STARTTLS: {reason}"))
            }
            other => other,
        })?;

        // no greeting follows the upgrade
        let tls = Self::wrap_tls(endpoint, plain.into_inner()).await?;
        tracing::debug!(name = "clients.imap.starttls", "Upgraded IMAP connection with STARTTLS");
        Ok(Client::new(tls))
    }
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    #[tracing::instrument(skip(self, endpoint), fields(imap = %format!("{}:{}", endpoint.host, endpoint.port)))]
    async fn connect(
        &self,
        endpoint: &ImapEndpoint,
    ) -> Result<Box<dyn MailboxSession>, MailboxError> {
        let client = self.open_client(endpoint).await?;
        let session = timeout(self.command_timeout, client.login(&endpoint.user, &endpoint.pass))
            .await
            .map_err(|_| MailboxError::CommandTimeout {
                command: "LOGIN",
                after: self.command_timeout,
            })?
            .map_err(|(e, _client)| MailboxError::Auth(e.to_string()))?;

        tracing::debug!(name = "clients.imap.connected", "IMAP session established");
        Ok(Box::new(AsyncImapSession {
            session,
            command_timeout: self.command_timeout,
        }))
    }
}

async fn read_greeting<T>(client: &mut Client<T>, limit: Duration) -> Result<(), MailboxError>
where
    T: AsyncRead + AsyncWrite + Unpin + Debug + Send,
{
    match timeout(limit, client.read_response()).await {
        Err(_) => Err(MailboxError::CommandTimeout {
            command: "greeting",
            after: limit,
        }),
        Ok(None) => Err(MailboxError::Connect(
            "connection closed before the server greeting".into(),
        )),
        Ok(Some(Err(e))) => Err(MailboxError::Connect(e.to_string())),
        Ok(Some(Ok(_))) => Ok(()),
    }
}

/// Await one IMAP command for at most `limit`.
async fn bounded<T>(
    limit: Duration,
    command: &'static str,
    fut: impl Future<Output = async_imap::error::Result<T>>,
) -> Result<T, MailboxError> {
    timeout(limit, fut)
        .await
        .map_err(|_| MailboxError::CommandTimeout {
            command,
            after: limit,
        })?
        .map_err(protocol)
}

struct AsyncImapSession {
    session: Session<ImapTls>,
    command_timeout: Duration,
}

fn protocol(e: async_imap::error::Error) -> MailboxError {
    MailboxError::Protocol(e.to_string())
}

/// Quote `value` as an IMAP quoted string.
pub fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Sequence set covering the newest `window` of `exists` messages.
pub fn recent_range(exists: u32, window: u32) -> Option<String> {
    if exists == 0 || window == 0 {
        return None;
    }
    let start = exists.saturating_sub(window - 1).max(1);
    Some(format!("{start}:{exists}"))
}

#[async_trait]
impl MailboxSession for AsyncImapSession {
    async fn open_mailbox(&mut self, mailbox: &str) -> Result<u32, MailboxError> {
        let selected = bounded(self.command_timeout, "SELECT", self.session.select(mailbox)).await?;
        Ok(selected.exists)
    }

    async fn search_subject(&mut self, subject: &str) -> Result<bool, MailboxError> {
        let query = format!("SUBJECT {}", quote(subject));
        let hits = bounded(self.command_timeout, "SEARCH", self.session.search(query)).await?;
        Ok(!hits.is_empty())
    }

    async fn recent_subjects(
        &mut self,
        exists: u32,
        window: u32,
    ) -> Result<Vec<String>, MailboxError> {
        let Some(range) = recent_range(exists, window) else {
            return Ok(Vec::new());
        };

        let session = &mut self.session;
        let fetches = bounded(self.command_timeout, "FETCH", async move {
            session
                .fetch(range, "ENVELOPE")
                .await?
                .try_collect::<Vec<_>>()
                .await
        })
        .await?;

        Ok(fetches
            .iter()
            .filter_map(|f| f.envelope())
            .filter_map(|env| env.subject.as_deref())
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect())
    }

    async fn close_mailbox(&mut self) -> Result<(), MailboxError> {
        bounded(self.command_timeout, "CLOSE", self.session.close()).await
    }

    async fn logout(&mut self) -> Result<(), MailboxError> {
        bounded(self.command_timeout, "LOGOUT", self.session.logout()).await
    }
}
