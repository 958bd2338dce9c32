//! Aggregate health endpoint.

use crate::scheduler::Scheduler;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use std::sync::Arc;

/// Tag for OpenAPI documentation.
pub const STATUS_TAG: &str = "Status";

pub const BODY_UP: &str = "UP";
pub const BODY_DOWN: &str = "DOWN";
pub const BODY_STALE: &str = "DOWN - stale data";

/// Shared state for the status endpoint.
#[derive(Clone)]
pub struct StatusState {
    pub scheduler: Arc<Scheduler>,
}

/// Answer from the state as it stood before this request, then kick off a
/// background run of all checks.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/status",
    tag = STATUS_TAG,
    operation_id = "Mail Health Status",
    summary = "Aggregate mail health",
    description = "Reports whether login, outbound, inbound and forwarding checks all passed recently.\n\n\
                   Every request also triggers a background run of the checks that are due; \
                   the answer reflects the state before that run.\n\n\
                   Intended for load-balancer probes and uptime monitors.",
    responses(
        (status = 200, description = "All checks passed (`UP`) or at least one failed or never ran (`DOWN`)", body = str, content_type = "text/plain", example = "UP"),
        (status = 418, description = "Results are too old to be trusted", body = str, content_type = "text/plain", example = "DOWN - stale data")
    )
)]
pub async fn status(State(state): State<StatusState>) -> impl IntoResponse {
    let scheduler = &state.scheduler;
    let stale = scheduler.is_state_stale().await;
    let healthy = scheduler.is_healthy().await;
    let snapshot = scheduler.state().await;

    tracing::info!(
        name = "api.status",
        stale,
        healthy,
        running = scheduler.is_running(),
        state = ?snapshot,
        "Status check"
    );

    let background = state.scheduler.clone();
    tokio::spawn(async move {
        background.run_all_checks().await;
    });

    let (code, body) = if stale {
        (StatusCode::IM_A_TEAPOT, BODY_STALE)
    } else if healthy {
        (StatusCode::OK, BODY_UP)
    } else {
        (StatusCode::OK, BODY_DOWN)
    };

    (
        code,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        body,
    )
}
