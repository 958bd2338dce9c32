use mail_healthcheck::AppResources;
use mail_healthcheck::api::{StatusState, shutdown_signal, start_webserver};
use mail_healthcheck::clients::{ImapConnector, LettreSender};
use mail_healthcheck::config::load_config;
use mail_healthcheck::scheduler::spawn_trigger_loop;
use rustls::crypto;
use rustls::crypto::CryptoProvider;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_tracing() {
    let default_directives = "mail_healthcheck=info,hyper=warn,lettre=warn";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = fmt::layer().with_target(true).with_level(true);

    registry.with(layer).init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    initialize_tracing();

    let config = Arc::new(load_config()?);

    CryptoProvider::install_default(crypto::ring::default_provider())
        .map_err(|_| color_eyre::eyre::eyre!("Failed to install crypto provider"))?;

    let resources = AppResources::new(
        config.clone(),
        Arc::new(LettreSender),
        Arc::new(ImapConnector::default()),
    );
    tracing::info!(
        port = config.port,
        login_interval_ms = config.timing.login_check_interval.as_millis() as u64,
        roundtrip_interval_ms = config.timing.roundtrip_check_interval.as_millis() as u64,
        trigger_interval_ms = config.timing.trigger_interval.as_millis() as u64,
        check_grace_ms = config.timing.check_grace.as_millis() as u64,
        "timing configuration"
    );

    // Periodic trigger in addition to /status (if enabled)
    spawn_trigger_loop(resources.scheduler.clone(), config.timing.trigger_interval);

    let state = StatusState {
        scheduler: resources.scheduler.clone(),
    };
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    start_webserver(state, addr, shutdown_signal()).await?;
    Ok(())
}
