//! HTTP surface of the daemon.
//!
//! - `status` - aggregate health (`/status`)
//! - `openapi` - OpenAPI/Utoipa configuration, rendered at `/api-docs`

pub mod openapi;
pub mod status;

pub use status::{STATUS_TAG, StatusState};

use std::future::Future;
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_axum::{router::OpenApiRouter, routes};
use utoipa_redoc::{Redoc, Servable};

/// Build the application router.
pub fn router(state: StatusState) -> axum::Router {
    let (router, api) = OpenApiRouter::with_openapi(openapi::ApiDoc::openapi())
        .routes(routes!(status::status))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .split_for_parts();

    router.merge(Redoc::with_url("/api-docs", api))
}

/// Serve the router on `addr` until `shutdown` resolves.
#[tracing::instrument(skip(state, shutdown))]
pub async fn start_webserver<F>(
    state: StatusState,
    addr: SocketAddr,
    shutdown: F,
) -> color_eyre::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(name = "api.listening", %addr, "Mail healthcheck service started");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| color_eyre::Report::msg(format!("Failed to start server: {e}")))?;

    tracing::info!(name = "api.closed", "Server closed");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!(name = "api.shutdown", "Shutting down");
}
