use crate::secrets::{SecretError, read_secret, secret_base_path};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error(transparent)]
    Secret(#[from] SecretError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// An SMTP submission endpoint.
#[derive(Clone, Deserialize)]
pub struct SmtpEndpoint {
    pub host: String,
    pub port: u16,
    /// `true` for implicit TLS, `false` for STARTTLS.
    pub secure: bool,
    pub user: String,
    /// Falls back to the matching secret file when left empty.
    #[serde(default)]
    pub pass: String,
    pub from: String,
}

impl fmt::Debug for SmtpEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("user", &self.user)
            .field("pass", &"<redacted>")
            .field("from", &self.from)
            .finish()
    }
}

/// An IMAP endpoint and the mailbox probes look into.
#[derive(Clone, Deserialize)]
pub struct ImapEndpoint {
    pub host: String,
    pub port: u16,
    /// `true` for implicit TLS, `false` for STARTTLS.
    pub secure: bool,
    pub user: String,
    #[serde(default)]
    pub pass: String,
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
}

impl fmt::Debug for ImapEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("user", &self.user)
            .field("pass", &"<redacted>")
            .field("mailbox", &self.mailbox)
            .finish()
    }
}

fn default_mailbox() -> String {
    "INBOX".into()
}

/// Intervals and thresholds driving the scheduler and the roundtrip probe.
///
/// Every value is configured in milliseconds.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimingConfig {
    #[serde(deserialize_with = "duration_ms")]
    pub login_check_interval: Duration,
    #[serde(deserialize_with = "duration_ms")]
    pub login_check_stale_after: Duration,
    #[serde(deserialize_with = "duration_ms")]
    pub roundtrip_check_interval: Duration,
    #[serde(deserialize_with = "duration_ms")]
    pub roundtrip_check_stale_after: Duration,
    #[serde(deserialize_with = "duration_ms")]
    pub message_wait_timeout: Duration,
    #[serde(deserialize_with = "duration_ms")]
    pub imap_poll_interval: Duration,
    /// Period of the background trigger. Zero disables it.
    #[serde(deserialize_with = "duration_ms")]
    pub trigger_interval: Duration,
    /// Time a check may spend on connecting and sending, on top of
    /// `message_wait_timeout` for roundtrips, before it is cancelled.
    #[serde(deserialize_with = "duration_ms")]
    pub check_grace: Duration,
}

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            login_check_interval: MINUTE,
            login_check_stale_after: MINUTE * 5,
            roundtrip_check_interval: HOUR,
            roundtrip_check_stale_after: HOUR * 2,
            message_wait_timeout: MINUTE * 3,
            imap_poll_interval: SECOND * 3,
            trigger_interval: Duration::ZERO,
            check_grace: MINUTE * 3,
        }
    }
}

fn duration_ms<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

/// Recipients of the roundtrip probe messages.
#[derive(Clone, Debug, Deserialize)]
pub struct TestAddresses {
    pub outbound_to: String,
    pub inbound_to: String,
    pub forwarding_to: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub timing: TimingConfig,
    pub local_smtp: SmtpEndpoint,
    pub local_imap: ImapEndpoint,
    pub external_smtp: SmtpEndpoint,
    pub external_imap: ImapEndpoint,
    pub forwarding_imap: ImapEndpoint,
    pub test_addresses: TestAddresses,
}

fn default_port() -> u16 {
    3000
}

impl AppConfig {
    /// Deserialize a built [`config::Config`], fill passwords from secret
    /// files below `secret_base` and validate the result.
    pub fn from_config(cfg: config::Config, secret_base: &Path) -> Result<Self, ConfigError> {
        let mut app: AppConfig = cfg.try_deserialize()?;
        app.resolve_secrets(secret_base)?;
        app.validate()?;
        Ok(app)
    }

    fn resolve_secrets(&mut self, base: &Path) -> Result<(), SecretError> {
        fill_secret(&mut self.local_smtp.pass, base, "mailhealth_local_smtp_pass")?;
        fill_secret(&mut self.local_imap.pass, base, "mailhealth_local_imap_pass")?;
        fill_secret(&mut self.external_smtp.pass, base, "mailhealth_ext_smtp_pass")?;
        fill_secret(&mut self.external_imap.pass, base, "mailhealth_ext_imap_pass")?;
        fill_secret(&mut self.forwarding_imap.pass, base, "mailhealth_fwd_imap_pass")?;
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Validation("port must be > 0".into()));
        }

        let smtp = [
            ("local_smtp", &self.local_smtp),
            ("external_smtp", &self.external_smtp),
        ];
        for (key, endpoint) in smtp {
            check_endpoint(key, &endpoint.host, endpoint.port)?;
            if endpoint.from.trim().is_empty() {
                return Err(ConfigError::Validation(format!("{key}.from must be set")));
            }
        }

        let imap = [
            ("local_imap", &self.local_imap),
            ("external_imap", &self.external_imap),
            ("forwarding_imap", &self.forwarding_imap),
        ];
        for (key, endpoint) in imap {
            check_endpoint(key, &endpoint.host, endpoint.port)?;
        }

        let recipients = [
            ("outbound_to", &self.test_addresses.outbound_to),
            ("inbound_to", &self.test_addresses.inbound_to),
            ("forwarding_to", &self.test_addresses.forwarding_to),
        ];
        for (key, address) in recipients {
            if address.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "test_addresses.{key} must be set"
                )));
            }
        }

        let timing = &self.timing;
        if timing.login_check_stale_after <= timing.login_check_interval {
            tracing::warn!(
                name = "config.timing.login_stale_window",
                interval_ms = timing.login_check_interval.as_millis() as u64,
                stale_after_ms = timing.login_check_stale_after.as_millis() as u64,
                "login staleness threshold does not exceed the login check interval"
            );
        }
        if timing.roundtrip_check_stale_after <= timing.roundtrip_check_interval {
            tracing::warn!(
                name = "config.timing.roundtrip_stale_window",
                interval_ms = timing.roundtrip_check_interval.as_millis() as u64,
                stale_after_ms = timing.roundtrip_check_stale_after.as_millis() as u64,
                "roundtrip staleness threshold does not exceed the roundtrip check interval"
            );
        }

        Ok(())
    }
}

fn fill_secret(pass: &mut String, base: &Path, name: &str) -> Result<(), SecretError> {
    if pass.is_empty() {
        *pass = read_secret(base, name)?;
    }
    Ok(())
}

fn check_endpoint(key: &str, host: &str, port: u16) -> Result<(), ConfigError> {
    if host.trim().is_empty() {
        return Err(ConfigError::Validation(format!("{key}.host must be set")));
    }
    if port == 0 {
        return Err(ConfigError::Validation(format!("{key}.port must be > 0")));
    }
    Ok(())
}

/// Flat environment names understood by earlier deployments, and the key
/// each one sets.
const LEGACY_ENV_KEYS: &[(&str, &str)] = &[
    ("PORT", "port"),
    ("LOGIN_INTERVAL", "timing.login_check_interval"),
    ("LOGIN_STALE_INTERVAL", "timing.login_check_stale_after"),
    ("ROUND_TRIP_INTERVAL", "timing.roundtrip_check_interval"),
    ("ROUND_TRIP_STALE_INTERVAL", "timing.roundtrip_check_stale_after"),
    ("ROUND_TRIP_LAND_TIMEOUT", "timing.message_wait_timeout"),
    ("IMAP_POLL_EVERY_MS", "timing.imap_poll_interval"),
    ("OUTBOUND_TO", "test_addresses.outbound_to"),
    ("INBOUND_TO", "test_addresses.inbound_to"),
    ("FWD_TO", "test_addresses.forwarding_to"),
];

const LEGACY_SMTP_PREFIXES: &[(&str, &str)] =
    &[("LOCAL_SMTP", "local_smtp"), ("EXT_SMTP", "external_smtp")];

const LEGACY_IMAP_PREFIXES: &[(&str, &str)] = &[
    ("LOCAL_IMAP", "local_imap"),
    ("EXT_IMAP", "external_imap"),
    ("FWD_IMAP", "forwarding_imap"),
];

fn legacy_key(name: &str) -> Option<String> {
    if let Some((_, key)) = LEGACY_ENV_KEYS.iter().find(|(env, _)| *env == name) {
        return Some((*key).to_string());
    }

    let endpoint_field = |prefixes: &[(&str, &str)], fields: &[&str]| {
        prefixes.iter().find_map(|(prefix, section)| {
            let field = name.strip_prefix(prefix)?.strip_prefix('_')?;
            fields
                .iter()
                .find(|f| f.eq_ignore_ascii_case(field))
                .map(|f| format!("{section}.{f}"))
        })
    };
    endpoint_field(LEGACY_SMTP_PREFIXES, &["host", "port", "secure", "user", "from"])
        .or_else(|| endpoint_field(LEGACY_IMAP_PREFIXES, &["host", "port", "secure", "user", "mailbox"]))
}

/// Translate the flat variable names of earlier deployments
/// (`LOCAL_SMTP_HOST`, `ROUND_TRIP_LAND_TIMEOUT`, `FWD_TO`, ...) into a
/// [`config::Environment`] source. Unknown names and empty values are
/// ignored.
pub fn legacy_environment<I>(vars: I) -> config::Environment
where
    I: IntoIterator<Item = (String, String)>,
{
    let mapped: config::Map<String, String> = vars
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .filter_map(|(name, value)| legacy_key(&name).map(|key| (key, value)))
        .collect();

    config::Environment::default()
        .try_parsing(true)
        .source(Some(mapped))
}

/// Load application configuration from `config.yaml` + environment overrides.
///
/// The file is optional and its path can be changed with
/// `MAIL_HEALTHCHECK_CONFIG`. The flat names of earlier deployments
/// ([`legacy_environment`]) override the file. Any environment variable
/// matching a key path separated by double underscores (e.g.
/// `LOCAL_SMTP__PORT`, `TIMING__LOGIN_CHECK_INTERVAL`) overrides both.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};

    let path =
        std::env::var("MAIL_HEALTHCHECK_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let cfg = Config::builder()
        .add_source(File::with_name(&path).required(false))
        .add_source(legacy_environment(std::env::vars()))
        .add_source(Environment::default().separator("__").try_parsing(true))
        .build()?;

    AppConfig::from_config(cfg, &secret_base_path())
}
