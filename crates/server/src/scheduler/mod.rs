//! Check scheduling and health state.
//!
//! The [`Scheduler`] owns the only mutable state of the daemon: the last
//! result of every check and when each group of checks last started. A run
//! is triggered from outside (the `/status` handler or the periodic
//! trigger); overlapping triggers are dropped at the entry guard.

use crate::checks::{CheckKind, CheckResult, CheckSuite};
use crate::config::TimingConfig;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Last known results and check timestamps. Lives for the process lifetime.
#[derive(Clone, Debug, Default)]
pub struct HealthState {
    pub login: Option<CheckResult>,
    pub outbound: Option<CheckResult>,
    pub inbound: Option<CheckResult>,
    pub forwarding: Option<CheckResult>,
    pub last_login_check_at: Option<Instant>,
    pub last_roundtrip_check_at: Option<Instant>,
}

fn is_due(last: Option<Instant>, now: Instant, interval: Duration) -> bool {
    match last {
        None => true,
        Some(at) => now.saturating_duration_since(at) >= interval,
    }
}

fn is_stale(last: Option<Instant>, now: Instant, threshold: Duration) -> bool {
    match last {
        None => true,
        Some(at) => now.saturating_duration_since(at) > threshold,
    }
}

impl HealthState {
    pub fn result(&self, kind: CheckKind) -> Option<&CheckResult> {
        match kind {
            CheckKind::Login => self.login.as_ref(),
            CheckKind::Outbound => self.outbound.as_ref(),
            CheckKind::Inbound => self.inbound.as_ref(),
            CheckKind::Forwarding => self.forwarding.as_ref(),
        }
    }

    fn record(&mut self, kind: CheckKind, result: CheckResult) {
        let slot = match kind {
            CheckKind::Login => &mut self.login,
            CheckKind::Outbound => &mut self.outbound,
            CheckKind::Inbound => &mut self.inbound,
            CheckKind::Forwarding => &mut self.forwarding,
        };
        *slot = Some(result);
    }

    pub fn is_login_due(&self, now: Instant, timing: &TimingConfig) -> bool {
        is_due(self.last_login_check_at, now, timing.login_check_interval)
    }

    pub fn is_roundtrip_due(&self, now: Instant, timing: &TimingConfig) -> bool {
        is_due(
            self.last_roundtrip_check_at,
            now,
            timing.roundtrip_check_interval,
        )
    }

    pub fn is_login_stale(&self, now: Instant, timing: &TimingConfig) -> bool {
        is_stale(self.last_login_check_at, now, timing.login_check_stale_after)
    }

    pub fn is_roundtrip_stale(&self, now: Instant, timing: &TimingConfig) -> bool {
        is_stale(
            self.last_roundtrip_check_at,
            now,
            timing.roundtrip_check_stale_after,
        )
    }

    pub fn is_state_stale(&self, now: Instant, timing: &TimingConfig) -> bool {
        self.is_login_stale(now, timing) || self.is_roundtrip_stale(now, timing)
    }

    /// All four checks have a result and every one of them passed.
    pub fn is_healthy(&self) -> bool {
        CheckKind::ALL
            .iter()
            .all(|kind| self.result(*kind).is_some_and(CheckResult::ok))
    }
}

/// What happened to a request to run all checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Another run was in progress; nothing was done.
    Rejected,
    Completed,
    /// A check panicked; results recorded before the panic are kept.
    Aborted,
}

/// Holds the running flag for one run and clears it when dropped.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Scheduler {
    timing: TimingConfig,
    checks: Arc<dyn CheckSuite>,
    state: RwLock<HealthState>,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(timing: TimingConfig, checks: Arc<dyn CheckSuite>) -> Self {
        Self {
            timing,
            checks,
            state: RwLock::new(HealthState::default()),
            running: AtomicBool::new(false),
        }
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Snapshot of the current state.
    pub async fn state(&self) -> HealthState {
        self.state.read().await.clone()
    }

    pub async fn should_run_login_check(&self) -> bool {
        self.state
            .read()
            .await
            .is_login_due(Instant::now(), &self.timing)
    }

    pub async fn should_run_roundtrip_checks(&self) -> bool {
        self.state
            .read()
            .await
            .is_roundtrip_due(Instant::now(), &self.timing)
    }

    pub async fn is_login_stale(&self) -> bool {
        self.state
            .read()
            .await
            .is_login_stale(Instant::now(), &self.timing)
    }

    pub async fn is_roundtrip_stale(&self) -> bool {
        self.state
            .read()
            .await
            .is_roundtrip_stale(Instant::now(), &self.timing)
    }

    pub async fn is_state_stale(&self) -> bool {
        self.state
            .read()
            .await
            .is_state_stale(Instant::now(), &self.timing)
    }

    pub async fn is_healthy(&self) -> bool {
        self.state.read().await.is_healthy()
    }

    /// Longest time `kind` may run before it is cancelled and recorded as
    /// failed.
    pub fn check_budget(&self, kind: CheckKind) -> Duration {
        match kind {
            CheckKind::Login => self.timing.check_grace,
            _ => self.timing.message_wait_timeout + self.timing.check_grace,
        }
    }

    async fn run_bounded(&self, kind: CheckKind) -> CheckResult {
        let budget = self.check_budget(kind);
        let started_at = OffsetDateTime::now_utc();
        match tokio::time::timeout(budget, self.checks.run(kind)).await {
            Ok(result) => result,
            Err(_) => CheckResult::timed_out(kind.name(), started_at, budget),
        }
    }

    /// Run every due check unless a run is already in progress.
    ///
    /// Never fails: check failures are recorded as results and a panicking
    /// check aborts the run without touching its slot.
    #[tracing::instrument(skip(self))]
    pub async fn run_all_checks(&self) -> RunOutcome {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            tracing::info!(name = "scheduler.run.rejected", "Checks already running");
            return RunOutcome::Rejected;
        };

        match AssertUnwindSafe(self.run_sequence()).catch_unwind().await {
            Ok(()) => RunOutcome::Completed,
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(
                    name = "scheduler.run.aborted",
                    error = %reason,
                    "Error running checks"
                );
                RunOutcome::Aborted
            }
        }
    }

    async fn run_sequence(&self) {
        self.run_login_check().await;

        let login_failed = self
            .state
            .read()
            .await
            .login
            .as_ref()
            .is_some_and(|r| !r.ok());
        if login_failed {
            tracing::warn!(
                name = "scheduler.roundtrip.skipped_login_failed",
                "Login check failed, skipping roundtrip checks"
            );
            return;
        }

        self.run_roundtrip_checks().await;
    }

    async fn run_login_check(&self) {
        {
            let mut state = self.state.write().await;
            let now = Instant::now();
            if !state.is_login_due(now, &self.timing) {
                tracing::info!(name = "scheduler.login.not_due", "Skipping login check (too soon)");
                return;
            }
            state.last_login_check_at = Some(now);
        }

        tracing::info!(name = "scheduler.login.running", "Running login check");
        let result = self.run_bounded(CheckKind::Login).await;
        self.state.write().await.record(CheckKind::Login, result);
    }

    async fn run_roundtrip_checks(&self) {
        {
            let mut state = self.state.write().await;
            let now = Instant::now();
            if !state.is_roundtrip_due(now, &self.timing) {
                tracing::info!(
                    name = "scheduler.roundtrip.not_due",
                    "Skipping roundtrip checks (too soon)"
                );
                return;
            }
            state.last_roundtrip_check_at = Some(now);
        }

        tracing::info!(name = "scheduler.roundtrip.running", "Running roundtrip checks");
        for kind in CheckKind::ROUNDTRIP_ORDER {
            let result = self.run_bounded(kind).await;
            let ok = result.ok();
            self.state.write().await.record(kind, result);
            if !ok {
                tracing::warn!(
                    name = "scheduler.roundtrip.stopped",
                    check = %kind,
                    "Roundtrip check failed, stopping"
                );
                return;
            }
        }

        tracing::info!(name = "scheduler.roundtrip.passed", "All roundtrip checks passed");
    }
}

/// Trigger [`Scheduler::run_all_checks`] every `every`. Missed ticks are
/// skipped. Returns `None` when `every` is zero.
pub fn spawn_trigger_loop(scheduler: Arc<Scheduler>, every: Duration) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let outcome = scheduler.run_all_checks().await;
            tracing::debug!(name = "scheduler.trigger.tick", ?outcome, "Periodic run finished");
        }
    }))
}
