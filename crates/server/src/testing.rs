//! In-memory stand-ins for the SMTP and IMAP adapters.

use crate::clients::{MailSender, MailboxConnector, MailboxSession, OutgoingMessage};
use crate::config::{AppConfig, ImapEndpoint, SmtpEndpoint, TestAddresses, TimingConfig};
use crate::error::{MailboxError, SendError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn smtp_endpoint() -> SmtpEndpoint {
    SmtpEndpoint {
        host: "smtp.example.org".into(),
        port: 465,
        secure: true,
        user: "probe".into(),
        pass: "secret".into(),
        from: "probe@example.org".into(),
    }
}

pub fn imap_endpoint() -> ImapEndpoint {
    ImapEndpoint {
        host: "imap.example.org".into(),
        port: 993,
        secure: true,
        user: "probe".into(),
        pass: "secret".into(),
        mailbox: "INBOX".into(),
    }
}

pub fn app_config() -> AppConfig {
    AppConfig {
        port: 3000,
        timing: TimingConfig::default(),
        local_smtp: smtp_endpoint(),
        local_imap: imap_endpoint(),
        external_smtp: smtp_endpoint(),
        external_imap: imap_endpoint(),
        forwarding_imap: imap_endpoint(),
        test_addresses: TestAddresses {
            outbound_to: "outbound@example.net".into(),
            inbound_to: "inbound@example.org".into(),
            forwarding_to: "forward@example.org".into(),
        },
    }
}

#[derive(Clone, Default)]
pub struct FakeSender {
    sent: Arc<Mutex<Vec<OutgoingMessage>>>,
    fail: bool,
}

impl FakeSender {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailSender for FakeSender {
    async fn send(
        &self,
        _endpoint: &SmtpEndpoint,
        message: &OutgoingMessage,
    ) -> Result<(), SendError> {
        if self.fail {
            return Err(SendError::Transport("535 authentication failed".into()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MailboxStats {
    pub connects: AtomicUsize,
    pub opens: AtomicUsize,
    pub searches: AtomicUsize,
    pub envelope_scans: AtomicUsize,
    pub closes: AtomicUsize,
    pub logouts: AtomicUsize,
}

#[derive(Clone)]
enum Delivery {
    /// `subject` becomes visible once the mailbox has been opened more than
    /// `polls` times.
    After { polls: usize, subject: String },
    Never,
    /// Everything the sender submitted is visible.
    Echo(Arc<Mutex<Vec<OutgoingMessage>>>),
}

#[derive(Clone)]
pub struct FakeMailbox {
    pub stats: Arc<MailboxStats>,
    delivery: Delivery,
    search_works: bool,
    select_fails: bool,
    select_stalls: bool,
    login_fails: bool,
}

impl FakeMailbox {
    fn with_delivery(delivery: Delivery) -> Self {
        Self {
            stats: Arc::default(),
            delivery,
            search_works: true,
            select_fails: false,
            select_stalls: false,
            login_fails: false,
        }
    }

    pub fn delivering_after(polls: usize) -> Self {
        Self::with_delivery(Delivery::After {
            polls,
            subject: "needle".into(),
        })
    }

    pub fn never_delivering() -> Self {
        Self::with_delivery(Delivery::Never)
    }

    pub fn echoing(sender: &FakeSender) -> Self {
        Self::with_delivery(Delivery::Echo(sender.sent.clone()))
    }

    pub fn with_subject(mut self, subject: &str) -> Self {
        if let Delivery::After { subject: s, .. } = &mut self.delivery {
            *s = subject.to_string();
        }
        self
    }

    pub fn without_search(mut self) -> Self {
        self.search_works = false;
        self
    }

    pub fn failing_select(mut self) -> Self {
        self.select_fails = true;
        self
    }

    /// SELECT never gets an answer.
    pub fn stalling_select(mut self) -> Self {
        self.select_stalls = true;
        self
    }

    pub fn rejecting_login(mut self) -> Self {
        self.login_fails = true;
        self
    }
}

#[async_trait]
impl MailboxConnector for FakeMailbox {
    async fn connect(
        &self,
        _endpoint: &ImapEndpoint,
    ) -> Result<Box<dyn MailboxSession>, MailboxError> {
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        if self.login_fails {
            return Err(MailboxError::Auth("NO [AUTHENTICATIONFAILED]".into()));
        }
        Ok(Box::new(FakeSession {
            mailbox: self.clone(),
        }))
    }
}

struct FakeSession {
    mailbox: FakeMailbox,
}

impl FakeSession {
    fn visible_subjects(&self) -> Vec<String> {
        match &self.mailbox.delivery {
            Delivery::After { polls, subject } => {
                if self.mailbox.stats.opens.load(Ordering::SeqCst) > *polls {
                    vec![subject.clone()]
                } else {
                    Vec::new()
                }
            }
            Delivery::Never => Vec::new(),
            Delivery::Echo(sent) => sent
                .lock()
                .unwrap()
                .iter()
                .map(|m| m.subject.clone())
                .collect(),
        }
    }
}

#[async_trait]
impl MailboxSession for FakeSession {
    async fn open_mailbox(&mut self, _mailbox: &str) -> Result<u32, MailboxError> {
        self.mailbox.stats.opens.fetch_add(1, Ordering::SeqCst);
        if self.mailbox.select_stalls {
            std::future::pending::<()>().await;
        }
        if self.mailbox.select_fails {
            return Err(MailboxError::Protocol("NO no such mailbox".into()));
        }
        Ok(self.visible_subjects().len() as u32)
    }

    async fn search_subject(&mut self, subject: &str) -> Result<bool, MailboxError> {
        self.mailbox.stats.searches.fetch_add(1, Ordering::SeqCst);
        if !self.mailbox.search_works {
            return Err(MailboxError::Protocol("BAD SEARCH not supported".into()));
        }
        Ok(self.visible_subjects().iter().any(|s| s.contains(subject)))
    }

    async fn recent_subjects(
        &mut self,
        _exists: u32,
        _window: u32,
    ) -> Result<Vec<String>, MailboxError> {
        self.mailbox.stats.envelope_scans.fetch_add(1, Ordering::SeqCst);
        Ok(self.visible_subjects())
    }

    async fn close_mailbox(&mut self) -> Result<(), MailboxError> {
        self.mailbox.stats.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn logout(&mut self) -> Result<(), MailboxError> {
        self.mailbox.stats.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
