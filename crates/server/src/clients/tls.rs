//! rustls client configuration for IMAP.
//!
//! Both the implicit TLS connection of secure endpoints and the STARTTLS
//! upgrade of the others verify the server against the webpki root set.
//! lettre brings its own TLS setup for SMTP.

use once_cell::sync::OnceCell;
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;

static TLS_CONFIG: OnceCell<Arc<ClientConfig>> = OnceCell::new();

/// The process-wide IMAP TLS configuration, built on first use.
///
/// Requires a process-wide rustls crypto provider to be installed first,
/// which `main` does before any check runs.
pub fn shared_tls_config() -> Arc<ClientConfig> {
    TLS_CONFIG
        .get_or_init(|| {
            let mut root_cert_store = RootCertStore::empty();
            root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

            let config = ClientConfig::builder()
                .with_root_certificates(root_cert_store)
                .with_no_client_auth();

            Arc::new(config)
        })
        .clone()
}
