//! A daemon that proves a mail stack works end-to-end.
//!
//! Login, outbound, inbound and forwarding checks are run on demand, gated
//! by per-group intervals, and their aggregate health is exposed over HTTP
//! for load balancers and uptime monitors.

use std::sync::Arc;

use crate::checks::HealthChecks;
use crate::clients::{MailSender, MailboxConnector};
use crate::config::AppConfig;
use crate::scheduler::Scheduler;

pub mod api;
pub mod checks;
pub mod clients;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod secrets;

#[cfg(test)]
pub(crate) mod testing;

/// Process-wide resources, built once at startup.
#[derive(Clone)]
pub struct AppResources {
    pub config: Arc<AppConfig>,
    pub scheduler: Arc<Scheduler>,
}

impl AppResources {
    /// Wire the check catalog and scheduler for `config` on top of the given
    /// mail adapters.
    pub fn new(
        config: Arc<AppConfig>,
        sender: Arc<dyn MailSender>,
        connector: Arc<dyn MailboxConnector>,
    ) -> Self {
        let checks = Arc::new(HealthChecks::new(config.clone(), sender, connector));
        let scheduler = Arc::new(Scheduler::new(config.timing.clone(), checks));
        Self { config, scheduler }
    }
}
