//! Tests for the run sequence, gating and reentrancy of the scheduler.

use async_trait::async_trait;
use mail_healthcheck::checks::{CheckKind, CheckResult, CheckSuite, run_check};
use mail_healthcheck::config::TimingConfig;
use mail_healthcheck::scheduler::{RunOutcome, Scheduler, spawn_trigger_loop};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Copy)]
enum Behaviour {
    Pass,
    Fail,
    Panic,
    Slow(Duration),
    /// Never completes, like a server that stopped answering mid-command.
    Hang,
}

/// A check suite with a scripted outcome per check that records what ran.
#[derive(Default)]
struct ScriptedChecks {
    behaviour: Mutex<HashMap<CheckKind, Behaviour>>,
    calls: Mutex<Vec<CheckKind>>,
}

impl ScriptedChecks {
    fn set(&self, kind: CheckKind, behaviour: Behaviour) {
        self.behaviour.lock().unwrap().insert(kind, behaviour);
    }

    fn calls(&self) -> Vec<CheckKind> {
        self.calls.lock().unwrap().clone()
    }

    fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl CheckSuite for ScriptedChecks {
    async fn run(&self, kind: CheckKind) -> CheckResult {
        self.calls.lock().unwrap().push(kind);
        let behaviour = self
            .behaviour
            .lock()
            .unwrap()
            .get(&kind)
            .copied()
            .unwrap_or(Behaviour::Pass);

        run_check(kind.name(), |_ctx| async move {
            match behaviour {
                Behaviour::Pass => Ok(()),
                Behaviour::Fail => Err(format!("{kind} failed")),
                Behaviour::Panic => panic!("{kind} exploded"),
                Behaviour::Slow(d) => {
                    tokio::time::sleep(d).await;
                    Ok(())
                }
                Behaviour::Hang => {
                    std::future::pending::<()>().await;
                    Ok(())
                }
            }
        })
        .await
    }
}

fn timing() -> TimingConfig {
    TimingConfig {
        login_check_interval: Duration::from_secs(60),
        login_check_stale_after: Duration::from_secs(300),
        roundtrip_check_interval: Duration::from_secs(3600),
        roundtrip_check_stale_after: Duration::from_secs(7200),
        ..TimingConfig::default()
    }
}

fn scheduler_with(timing: TimingConfig) -> (Arc<Scheduler>, Arc<ScriptedChecks>) {
    let checks = Arc::new(ScriptedChecks::default());
    let scheduler = Arc::new(Scheduler::new(timing, checks.clone()));
    (scheduler, checks)
}

use CheckKind::{Forwarding, Inbound, Login, Outbound};

// =============================================================================
// Run sequence
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_first_run_executes_everything_in_order() {
    let (scheduler, checks) = scheduler_with(timing());

    assert_eq!(scheduler.run_all_checks().await, RunOutcome::Completed);

    assert_eq!(checks.calls(), [Login, Forwarding, Outbound, Inbound]);
    assert!(scheduler.is_healthy().await);
    assert!(!scheduler.is_state_stale().await);
    assert!(!scheduler.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_login_failure_skips_roundtrip_stage() {
    let (scheduler, checks) = scheduler_with(timing());
    checks.set(Login, Behaviour::Fail);

    scheduler.run_all_checks().await;

    assert_eq!(checks.calls(), [Login]);
    let state = scheduler.state().await;
    assert_eq!(state.login.as_ref().and_then(|r| r.error()), Some("login failed"));
    assert!(state.forwarding.is_none());
    assert!(state.outbound.is_none());
    assert!(state.inbound.is_none());
    assert!(state.last_roundtrip_check_at.is_none());
    assert!(!scheduler.is_healthy().await);
}

#[tokio::test(start_paused = true)]
async fn test_forwarding_failure_leaves_outbound_and_inbound_unset() {
    let (scheduler, checks) = scheduler_with(timing());
    checks.set(Forwarding, Behaviour::Fail);

    scheduler.run_all_checks().await;

    assert_eq!(checks.calls(), [Login, Forwarding]);
    let state = scheduler.state().await;
    assert!(!state.forwarding.as_ref().unwrap().ok());
    assert!(state.outbound.is_none());
    assert!(state.inbound.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_outbound_failure_leaves_inbound_unset() {
    let (scheduler, checks) = scheduler_with(timing());
    checks.set(Outbound, Behaviour::Fail);

    scheduler.run_all_checks().await;

    assert_eq!(checks.calls(), [Login, Forwarding, Outbound]);
    let state = scheduler.state().await;
    assert!(state.forwarding.as_ref().unwrap().ok());
    assert!(!state.outbound.as_ref().unwrap().ok());
    assert!(state.inbound.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_skipped_slots_keep_previous_results() {
    let mut timing = timing();
    timing.roundtrip_check_interval = Duration::from_secs(10);
    let (scheduler, checks) = scheduler_with(timing);

    scheduler.run_all_checks().await;
    let first_inbound = scheduler.state().await.inbound.unwrap();

    tokio::time::advance(Duration::from_secs(10)).await;
    checks.set(Forwarding, Behaviour::Fail);
    scheduler.run_all_checks().await;

    let state = scheduler.state().await;
    assert!(!state.forwarding.as_ref().unwrap().ok());
    assert_eq!(state.inbound.as_ref(), Some(&first_inbound));
    assert!(!scheduler.is_healthy().await);
}

// =============================================================================
// Interval gating
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_should_run_checks_lifecycle() {
    let (scheduler, _checks) = scheduler_with(timing());

    assert!(scheduler.should_run_login_check().await);
    assert!(scheduler.should_run_roundtrip_checks().await);

    scheduler.run_all_checks().await;
    assert!(!scheduler.should_run_login_check().await);
    assert!(!scheduler.should_run_roundtrip_checks().await);

    tokio::time::advance(Duration::from_secs(60)).await;
    assert!(scheduler.should_run_login_check().await);
    assert!(!scheduler.should_run_roundtrip_checks().await);

    tokio::time::advance(Duration::from_secs(3540)).await;
    assert!(scheduler.should_run_roundtrip_checks().await);
}

#[tokio::test(start_paused = true)]
async fn test_second_run_inside_login_interval_still_evaluates_roundtrip_gate() {
    let mut timing = timing();
    timing.roundtrip_check_interval = Duration::from_secs(20);
    let (scheduler, checks) = scheduler_with(timing);

    scheduler.run_all_checks().await;
    let first_login_at = scheduler.state().await.last_login_check_at;
    checks.clear_calls();

    tokio::time::advance(Duration::from_secs(30)).await;
    scheduler.run_all_checks().await;

    assert_eq!(checks.calls(), [Forwarding, Outbound, Inbound]);
    assert_eq!(scheduler.state().await.last_login_check_at, first_login_at);
}

#[tokio::test(start_paused = true)]
async fn test_nothing_due_runs_nothing() {
    let (scheduler, checks) = scheduler_with(timing());

    scheduler.run_all_checks().await;
    checks.clear_calls();

    tokio::time::advance(Duration::from_secs(30)).await;
    assert_eq!(scheduler.run_all_checks().await, RunOutcome::Completed);
    assert!(checks.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_previous_login_failure_blocks_roundtrip_even_when_login_not_due() {
    let mut timing = timing();
    timing.roundtrip_check_interval = Duration::from_secs(1);
    let (scheduler, checks) = scheduler_with(timing);
    checks.set(Login, Behaviour::Fail);

    scheduler.run_all_checks().await;
    checks.clear_calls();

    tokio::time::advance(Duration::from_secs(5)).await;
    scheduler.run_all_checks().await;
    assert!(checks.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_interval_is_stamped_before_the_check_runs() {
    let (scheduler, checks) = scheduler_with(timing());
    checks.set(Login, Behaviour::Slow(Duration::from_secs(5)));

    let background = scheduler.clone();
    let run = tokio::spawn(async move { background.run_all_checks().await });

    // let the run reach the slow login check
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(scheduler.is_running());
    assert!(!scheduler.should_run_login_check().await);
    assert!(scheduler.state().await.login.is_none());

    assert_eq!(run.await.unwrap(), RunOutcome::Completed);
    assert!(scheduler.state().await.login.is_some());
}

// =============================================================================
// Staleness
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_staleness_follows_thresholds() {
    let (scheduler, _checks) = scheduler_with(timing());
    assert!(scheduler.is_state_stale().await);

    scheduler.run_all_checks().await;
    assert!(!scheduler.is_state_stale().await);

    tokio::time::advance(Duration::from_secs(300)).await;
    assert!(!scheduler.is_login_stale().await);

    tokio::time::advance(Duration::from_millis(1)).await;
    assert!(scheduler.is_login_stale().await);
    assert!(!scheduler.is_roundtrip_stale().await);
    assert!(scheduler.is_state_stale().await);
}

#[tokio::test(start_paused = true)]
async fn test_login_failure_keeps_roundtrip_stale() {
    let (scheduler, checks) = scheduler_with(timing());
    checks.set(Login, Behaviour::Fail);

    scheduler.run_all_checks().await;

    assert!(!scheduler.is_login_stale().await);
    assert!(scheduler.is_roundtrip_stale().await);
    assert!(scheduler.is_state_stale().await);
}

// =============================================================================
// Reentrancy
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_runs_execute_once() {
    let (scheduler, checks) = scheduler_with(timing());
    checks.set(Login, Behaviour::Slow(Duration::from_secs(2)));

    let (a, b) = tokio::join!(scheduler.run_all_checks(), scheduler.run_all_checks());

    let mut outcomes = [a, b];
    outcomes.sort_by_key(|o| *o == RunOutcome::Rejected);
    assert_eq!(outcomes, [RunOutcome::Completed, RunOutcome::Rejected]);
    assert_eq!(checks.calls(), [Login, Forwarding, Outbound, Inbound]);
    assert!(!scheduler.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_many_spawned_triggers_run_sequence_once() {
    let (scheduler, checks) = scheduler_with(timing());
    checks.set(Forwarding, Behaviour::Slow(Duration::from_secs(1)));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let s = scheduler.clone();
            tokio::spawn(async move { s.run_all_checks().await })
        })
        .collect();

    let mut completed = 0;
    for handle in handles {
        if handle.await.unwrap() == RunOutcome::Completed {
            completed += 1;
        }
    }

    assert_eq!(completed, 1);
    assert_eq!(checks.calls(), [Login, Forwarding, Outbound, Inbound]);
    assert!(!scheduler.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_panicking_check_is_contained() {
    let (scheduler, checks) = scheduler_with(timing());
    checks.set(Outbound, Behaviour::Panic);

    assert_eq!(scheduler.run_all_checks().await, RunOutcome::Aborted);
    assert!(!scheduler.is_running());

    let state = scheduler.state().await;
    assert!(state.forwarding.as_ref().unwrap().ok());
    assert!(state.outbound.is_none());
    assert!(state.inbound.is_none());
    assert!(state.last_roundtrip_check_at.is_some());

    // the guard was released, so the next due run goes ahead
    checks.set(Outbound, Behaviour::Pass);
    tokio::time::advance(Duration::from_secs(3600)).await;
    assert_eq!(scheduler.run_all_checks().await, RunOutcome::Completed);
    assert!(scheduler.is_healthy().await);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_check_is_cancelled_and_recorded_as_failure() {
    let (scheduler, checks) = scheduler_with(TimingConfig {
        message_wait_timeout: Duration::from_secs(20),
        check_grace: Duration::from_secs(10),
        ..timing()
    });
    checks.set(Outbound, Behaviour::Hang);

    let started = tokio::time::Instant::now();
    assert_eq!(scheduler.run_all_checks().await, RunOutcome::Completed);

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(30) && elapsed < Duration::from_secs(31));
    assert_eq!(checks.calls(), [Login, Forwarding, Outbound]);
    let state = scheduler.state().await;
    assert_eq!(
        state.outbound.as_ref().and_then(|r| r.error()),
        Some("Check did not complete within 30s")
    );
    assert!(state.inbound.is_none());
    assert!(!scheduler.is_healthy().await);
    assert!(!scheduler.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_hanging_login_does_not_wedge_later_triggers() {
    let (scheduler, checks) = scheduler_with(TimingConfig {
        check_grace: Duration::from_secs(10),
        ..timing()
    });
    checks.set(Login, Behaviour::Hang);

    let first = {
        let s = scheduler.clone();
        tokio::spawn(async move { s.run_all_checks().await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;

    // still inside the login budget
    assert!(scheduler.is_running());
    assert_eq!(scheduler.run_all_checks().await, RunOutcome::Rejected);

    assert_eq!(first.await.unwrap(), RunOutcome::Completed);
    assert!(!scheduler.is_running());
    let state = scheduler.state().await;
    assert!(
        state
            .login
            .as_ref()
            .and_then(|r| r.error())
            .is_some_and(|e| e.contains("did not complete"))
    );
    assert!(state.last_roundtrip_check_at.is_none());

    checks.set(Login, Behaviour::Pass);
    tokio::time::advance(Duration::from_secs(60)).await;
    assert_eq!(scheduler.run_all_checks().await, RunOutcome::Completed);
    assert!(scheduler.is_healthy().await);
}

// =============================================================================
// Periodic trigger
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_trigger_loop_disabled_for_zero_interval() {
    let (scheduler, _checks) = scheduler_with(timing());
    assert!(spawn_trigger_loop(scheduler, Duration::ZERO).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_trigger_loop_runs_checks() {
    let (scheduler, checks) = scheduler_with(timing());

    let handle = spawn_trigger_loop(scheduler.clone(), Duration::from_secs(60)).unwrap();
    tokio::time::sleep(Duration::from_secs(61)).await;
    handle.abort();

    // first tick at t=0 runs everything, the t=60 tick only re-runs login
    assert_eq!(
        checks.calls(),
        [Login, Forwarding, Outbound, Inbound, Login]
    );
}
