//! Admission control through the engine.

mod common;

use std::time::Duration;

use common::TestHarness;
use testpilot_core::{orchestrator::RunStatus, testing::fixtures, EngineError, ResultCode};

const STEPS: &str = "open https://app.test/\nclick Go";

#[tokio::test]
async fn test_runs_beyond_capacity_wait_in_queue() {
    let mut config = fixtures::fast_config();
    config.queue.max_concurrent = 1;
    let harness = TestHarness::with_config(config, &[fixtures::test_case("c", STEPS)]);
    harness
        .driver
        .set_action_delay(Duration::from_millis(100))
        .await;

    let first = harness.engine.submit_run("c", "alice", 0).unwrap();
    let second = harness.engine.submit_run("c", "bob", 0).unwrap();
    harness.wait_until_running(&first).await;

    let status = harness.engine.queue_status();
    assert_eq!(status.in_flight, 1);
    assert_eq!(status.backlog, 1);
    assert_eq!(harness.engine.get_run(&second).unwrap().status, RunStatus::Queued);

    harness.wait_for_run(&first).await;
    assert_eq!(harness.wait_for_run(&second).await.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_queue_full_is_reported() {
    let mut config = fixtures::fast_config();
    config.queue.max_concurrent = 1;
    config.queue.max_backlog = 1;
    let harness = TestHarness::with_config(config, &[fixtures::test_case("c", STEPS)]);
    harness
        .driver
        .set_action_delay(Duration::from_millis(100))
        .await;

    let running = harness.engine.submit_run("c", "alice", 0).unwrap();
    harness.wait_until_running(&running).await;
    harness.engine.submit_run("c", "bob", 0).unwrap();

    let err = harness.engine.submit_run("c", "carol", 0).unwrap_err();
    assert_eq!(err.result_code(), Some(ResultCode::QueueFull));
}

#[tokio::test]
async fn test_cancel_queued_run_never_starts() {
    let mut config = fixtures::fast_config();
    config.queue.max_concurrent = 1;
    let harness = TestHarness::with_config(config, &[fixtures::test_case("c", STEPS)]);
    harness
        .driver
        .set_action_delay(Duration::from_millis(100))
        .await;

    let first = harness.engine.submit_run("c", "alice", 0).unwrap();
    let second = harness.engine.submit_run("c", "bob", 0).unwrap();
    harness.wait_until_running(&first).await;

    assert_eq!(harness.engine.cancel_run(&second).unwrap(), ResultCode::Accepted);
    harness.wait_for_run(&first).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!harness.driver.opened_sessions().await.contains(&second));
    assert!(matches!(
        harness.engine.get_run(&second).unwrap_err(),
        EngineError::NotFound(_)
    ));
}
