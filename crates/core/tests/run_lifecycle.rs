//! Run lifecycle integration tests.
//!
//! These tests drive single case runs through the engine:
//! queued -> running -> completed | failed | cancelled

mod common;

use std::time::Duration;

use common::TestHarness;
use testpilot_core::{
    driver::{Action, DriverError},
    notifier::ObserverFilter,
    orchestrator::{RunProgress, RunStatus, StepOutcome},
    store::RunFilter,
    testing::fixtures,
    EngineError, ResultCode,
};

const LOGIN_STEPS: &str = "open https://app.test/login\nclick Save\npress Enter";

fn outcomes(steps: &[testpilot_core::orchestrator::StepResult]) -> Vec<StepOutcome> {
    steps.iter().map(|s| s.outcome).collect()
}

#[tokio::test]
async fn test_failed_step_does_not_stop_the_run() {
    let harness = TestHarness::new(&[fixtures::test_case("login", LOGIN_STEPS)]);
    harness
        .driver
        .set_action_failure("click Save", "button disabled")
        .await;

    let run_id = harness.engine.submit_run("login", "alice", 0).unwrap();
    let record = harness.wait_for_run(&run_id).await;

    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(
        outcomes(&record.steps),
        vec![StepOutcome::Passed, StepOutcome::Failed, StepOutcome::Passed]
    );
    assert_eq!(record.progress.total_steps, 3);
    assert_eq!(record.progress.completed_steps, 3);
    assert_eq!(record.progress.failed_steps, 1);
    assert!(record.error.is_none());
    assert!(record.started_at.is_some());
    assert!(record.finished_at.is_some());

    let executed = harness.driver.executed(&run_id).await;
    assert_eq!(
        executed[0],
        Action::Navigate {
            url: "https://app.test/login".into()
        }
    );
    assert_eq!(harness.driver.closed_sessions().await, vec![run_id.clone()]);
}

#[tokio::test]
async fn test_lost_session_fails_the_run() {
    let harness = TestHarness::new(&[fixtures::test_case("login", LOGIN_STEPS)]);
    harness
        .driver
        .set_action_error("click Save", DriverError::SessionLost("browser crashed".into()))
        .await;

    let run_id = harness.engine.submit_run("login", "alice", 0).unwrap();
    let record = harness.wait_for_run(&run_id).await;

    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(
        outcomes(&record.steps),
        vec![StepOutcome::Passed, StepOutcome::Failed]
    );
    assert!(record.error.as_deref().unwrap().contains("browser crashed"));
    assert_eq!(harness.driver.executed(&run_id).await.len(), 2);
    assert_eq!(harness.driver.closed_sessions().await, vec![run_id]);
}

#[tokio::test]
async fn test_unparseable_step_is_blocked() {
    let steps = "open https://app.test/\nfrobnicate the widget\npress Enter";
    let harness = TestHarness::new(&[fixtures::test_case("odd", steps)]);

    let run_id = harness.engine.submit_run("odd", "alice", 0).unwrap();
    let record = harness.wait_for_run(&run_id).await;

    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(
        outcomes(&record.steps),
        vec![StepOutcome::Passed, StepOutcome::Blocked, StepOutcome::Passed]
    );
    assert_eq!(record.progress.blocked_steps, 1);
    assert_eq!(record.steps[1].description, "frobnicate the widget");
}

#[tokio::test]
async fn test_chained_clauses_become_separate_steps() {
    let steps = "open https://app.test/ then click Login\ntype \"bob\" into #user";
    let harness = TestHarness::new(&[fixtures::test_case("chain", steps)]);

    let run_id = harness.engine.submit_run("chain", "alice", 0).unwrap();
    let record = harness.wait_for_run(&run_id).await;

    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.steps.len(), 3);
    assert_eq!(record.progress.total_steps, 3);
    assert_eq!(harness.interpreter.calls().await.len(), 3);
}

#[tokio::test]
async fn test_interpreter_outage_fails_the_run() {
    let harness = TestHarness::new(&[fixtures::test_case("login", LOGIN_STEPS)]);
    harness.interpreter.set_unavailable("connection refused").await;

    let run_id = harness.engine.submit_run("login", "alice", 0).unwrap();
    let record = harness.wait_for_run(&run_id).await;

    assert_eq!(record.status, RunStatus::Failed);
    assert!(record.steps.is_empty());
    assert!(record.error.as_deref().unwrap().contains("connection refused"));
}

#[tokio::test]
async fn test_cancel_running_run() {
    let harness = TestHarness::new(&[fixtures::test_case("login", LOGIN_STEPS)]);
    harness
        .driver
        .set_action_delay(Duration::from_millis(100))
        .await;

    let run_id = harness.engine.submit_run("login", "alice", 0).unwrap();
    harness.wait_until_running(&run_id).await;

    assert_eq!(harness.engine.cancel_run(&run_id).unwrap(), ResultCode::Accepted);
    let record = harness.wait_for_run(&run_id).await;

    assert_eq!(record.status, RunStatus::Cancelled);
    assert!(record.steps.len() < 3);
    assert!(record.error.is_none());

    let again = harness.engine.cancel_run(&run_id).unwrap_err();
    assert_eq!(again.result_code(), Some(ResultCode::AlreadyTerminal));
}

#[tokio::test]
async fn test_status_events_arrive_in_order() {
    let harness = TestHarness::new(&[fixtures::test_case("login", LOGIN_STEPS)]);
    let mut events = harness.engine.notifier().subscribe(ObserverFilter::All);

    let run_id = harness.engine.submit_run("login", "alice", 0).unwrap();
    harness.wait_for_run(&run_id).await;

    let mut seen = Vec::new();
    while let Some(event) = events.try_recv() {
        if event.run_id == run_id {
            seen.push((event.sequence, event.status));
        }
    }
    assert_eq!(
        seen,
        vec![
            (1, RunStatus::Queued),
            (2, RunStatus::Running),
            (3, RunStatus::Completed)
        ]
    );
}

#[tokio::test]
async fn test_unknown_case_is_not_found() {
    let harness = TestHarness::new(&[]);

    let err = harness.engine.submit_run("missing", "alice", 0).unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    assert_eq!(err.result_code(), Some(ResultCode::NotFound));
}

#[tokio::test]
async fn test_finished_runs_are_persisted() {
    let harness = TestHarness::new(&[fixtures::test_case("login", LOGIN_STEPS)]);

    let run_id = harness.engine.submit_run("login", "alice", 0).unwrap();
    harness.wait_for_run(&run_id).await;

    let stored = harness
        .engine
        .list_runs(&RunFilter::new().with_case("login"))
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, run_id);
    assert_eq!(stored[0].status, RunStatus::Completed);
}

#[tokio::test]
async fn test_transient_open_failure_is_retried() {
    let harness = TestHarness::new(&[fixtures::test_case("login", LOGIN_STEPS)]);
    harness
        .driver
        .fail_next_opens(vec![DriverError::Unavailable("sidecar restarting".into())])
        .await;

    let run_id = harness.engine.submit_run("login", "alice", 0).unwrap();
    let record = harness.wait_for_run(&run_id).await;

    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.attempts, 2);
}

#[tokio::test]
async fn test_cancel_while_session_opening_is_honored() {
    let harness = TestHarness::new(&[fixtures::test_case("login", LOGIN_STEPS)]);
    harness
        .driver
        .set_open_delay(Duration::from_millis(200))
        .await;
    harness
        .driver
        .fail_next_opens(vec![DriverError::Unavailable("sidecar restarting".into())])
        .await;

    let run_id = harness.engine.submit_run("login", "alice", 0).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(harness.engine.cancel_run(&run_id).unwrap(), ResultCode::Accepted);
    let record = harness.wait_for_run(&run_id).await;

    assert_eq!(record.status, RunStatus::Cancelled);
    assert_eq!(record.attempts, 1);
    assert!(record.steps.is_empty());
    // The failed open was not retried
    assert!(harness.driver.opened_sessions().await.is_empty());
    assert_eq!(harness.engine.queue_status().in_flight, 0);
}

#[tokio::test]
async fn test_cancel_during_successful_open_stops_before_first_step() {
    let harness = TestHarness::new(&[fixtures::test_case("login", LOGIN_STEPS)]);
    harness
        .driver
        .set_open_delay(Duration::from_millis(200))
        .await;

    let run_id = harness.engine.submit_run("login", "alice", 0).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(harness.engine.cancel_run(&run_id).unwrap(), ResultCode::Accepted);
    let record = harness.wait_for_run(&run_id).await;

    assert_eq!(record.status, RunStatus::Cancelled);
    assert!(harness.driver.executed(&run_id).await.is_empty());
    assert_eq!(harness.driver.closed_sessions().await, vec![run_id]);
}

#[tokio::test]
async fn test_task_timeout_fails_run_and_frees_slot() {
    let mut config = fixtures::fast_config();
    config.queue.max_concurrent = 1;
    config.queue.task_timeout_secs = 1;
    let harness = TestHarness::with_config(
        config,
        &[
            fixtures::test_case("slow", LOGIN_STEPS),
            fixtures::test_case("quick", "press Enter"),
        ],
    );
    harness
        .driver
        .set_action_delay(Duration::from_millis(600))
        .await;

    let slow = harness.engine.submit_run("slow", "alice", 0).unwrap();
    let quick = harness.engine.submit_run("quick", "bob", 0).unwrap();

    let record = harness.wait_for_run(&slow).await;
    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("timed out after 1s"));
    assert_eq!(record.steps.len(), 2);

    let next = harness.wait_for_run(&quick).await;
    assert_eq!(next.status, RunStatus::Completed);
    assert_eq!(harness.engine.queue_status().in_flight, 0);
}

#[tokio::test]
async fn test_progress_never_regresses_while_running() {
    let steps = "open https://app.test/\nclick Menu then click Settings\nclick Save\npress Escape";
    let harness = TestHarness::new(&[fixtures::test_case("settings", steps)]);
    harness
        .driver
        .set_action_delay(Duration::from_millis(40))
        .await;
    harness
        .driver
        .set_action_failure("click Save", "button disabled")
        .await;

    let run_id = harness.engine.submit_run("settings", "alice", 0).unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let mut previous: Option<RunProgress> = None;
    let mut running_snapshots = 0;
    loop {
        let record = harness.engine.get_run(&run_id).unwrap();
        let progress = record.progress;
        assert!(
            progress.completed_steps <= progress.total_steps,
            "completed {} > total {}",
            progress.completed_steps,
            progress.total_steps
        );
        if let Some(prev) = previous {
            assert!(progress.total_steps >= prev.total_steps);
            assert!(progress.completed_steps >= prev.completed_steps);
            assert!(progress.passed_steps >= prev.passed_steps);
            assert!(progress.failed_steps >= prev.failed_steps);
            assert!(progress.blocked_steps >= prev.blocked_steps);
        }
        if record.status == RunStatus::Running {
            running_snapshots += 1;
        }
        if record.status.is_terminal() {
            assert_eq!(record.status, RunStatus::Completed);
            assert_eq!(progress.total_steps, 5);
            assert_eq!(progress.completed_steps, 5);
            assert_eq!(progress.failed_steps, 1);
            break;
        }
        previous = Some(progress);
        assert!(tokio::time::Instant::now() < deadline, "run never finished");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(running_snapshots > 1);
}
