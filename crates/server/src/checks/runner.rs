//! Uniform execution wrapper for probes.

use crate::error::ProbeError;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// Correlation data handed to a probe when it starts.
#[derive(Clone, Copy, Debug)]
pub struct ProbeContext {
    pub id: Uuid,
    pub started_at: OffsetDateTime,
}

/// Outcome of a single probe execution.
///
/// Created by [`run_check`], or by [`CheckResult::timed_out`] when a check
/// is cancelled; never modified afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckResult {
    id: Uuid,
    started_at: OffsetDateTime,
    ended_at: OffsetDateTime,
    duration_ms: u64,
    error: Option<String>,
}

impl CheckResult {
    fn finish(ctx: ProbeContext, error: Option<String>) -> Self {
        let ended_at = OffsetDateTime::now_utc();
        let duration_ms = (ended_at - ctx.started_at).whole_milliseconds().max(0) as u64;
        Self {
            id: ctx.id,
            started_at: ctx.started_at,
            ended_at,
            duration_ms,
            error,
        }
    }

    /// Failed result for a check cancelled after running for `budget`.
    pub fn timed_out(check_name: &str, started_at: OffsetDateTime, budget: Duration) -> Self {
        let ctx = ProbeContext {
            id: Uuid::new_v4(),
            started_at,
        };
        let error = ProbeError::TimedOut(budget).to_string();
        tracing::error!(
            name = "checks.run.timed_out",
            check_name = check_name,
            id = %ctx.id,
            error = %error,
            "Health check did not complete"
        );
        Self::finish(ctx, Some(error))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }

    pub fn ended_at(&self) -> OffsetDateTime {
        self.ended_at
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn ok(&self) -> bool {
        self.error.is_none()
    }

    /// Failure message; present iff the check failed.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Run `probe` under a fresh correlation id and capture its outcome.
///
/// The probe receives the id and start time so it can embed them in the
/// messages it sends. Errors are reduced to their display text.
pub async fn run_check<F, Fut, E>(check_name: &str, probe: F) -> CheckResult
where
    F: FnOnce(ProbeContext) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let ctx = ProbeContext {
        id: Uuid::new_v4(),
        started_at: OffsetDateTime::now_utc(),
    };

    tracing::info!(
        name = "checks.run.start",
        check_name = check_name,
        id = %ctx.id,
        "Running health check"
    );

    match probe(ctx).await {
        Ok(()) => CheckResult::finish(ctx, None),
        Err(e) => {
            let error = e.to_string();
            tracing::error!(
                name = "checks.run.failed",
                check_name = check_name,
                id = %ctx.id,
                error = %error,
                "Health check failed"
            );
            CheckResult::finish(ctx, Some(error))
        }
    }
}
