//! Live frame streaming through the engine.

mod common;

use std::time::Duration;

use common::TestHarness;
use testpilot_core::{testing::fixtures, EngineError, ResultCode};

const SLOW_STEPS: &str = "open https://app.test/\nclick Next\nclick Finish";

async fn slow_harness() -> TestHarness {
    let harness = TestHarness::new(&[fixtures::test_case("slow", SLOW_STEPS)]);
    harness
        .driver
        .set_action_delay(Duration::from_millis(150))
        .await;
    harness
}

#[tokio::test]
async fn test_viewer_receives_frames_until_run_ends() {
    let harness = slow_harness().await;
    let run_id = harness.engine.submit_run("slow", "alice", 0).unwrap();
    harness.wait_until_running(&run_id).await;

    let token = harness.engine.issue_stream_token(&run_id).unwrap();
    let mut stream = harness
        .engine
        .open_stream(&run_id, Some(&token.token), "viewer-1")
        .unwrap();

    let first = tokio::time::timeout(Duration::from_secs(2), stream.next_frame())
        .await
        .unwrap()
        .expect("a frame right after joining");
    // JPEG SOI marker
    assert_eq!(&first[..2], &[0xFF, 0xD8]);

    // The stream ends once the run is over
    harness.wait_for_run(&run_id).await;
    let ended = tokio::time::timeout(Duration::from_secs(2), async {
        while stream.next_frame().await.is_some() {}
    })
    .await;
    assert!(ended.is_ok());
    assert!(!harness.engine.broadcaster().is_streaming(&run_id));
}

#[tokio::test]
async fn test_stream_requires_matching_token() {
    let harness = slow_harness().await;
    let run_a = harness.engine.submit_run("slow", "alice", 0).unwrap();
    let run_b = harness.engine.submit_run("slow", "bob", 0).unwrap();
    harness.wait_until_running(&run_a).await;
    harness.wait_until_running(&run_b).await;

    let missing = harness.engine.open_stream(&run_a, None, "v").unwrap_err();
    assert_eq!(missing.result_code(), Some(ResultCode::Forbidden));

    let token_b = harness.engine.issue_stream_token(&run_b).unwrap();
    let wrong = harness
        .engine
        .open_stream(&run_a, Some(&token_b.token), "v")
        .unwrap_err();
    assert!(matches!(wrong, EngineError::Forbidden(_)));
}

#[tokio::test]
async fn test_no_token_for_finished_run() {
    let harness = TestHarness::new(&[fixtures::test_case("quick", "press Enter")]);
    let run_id = harness.engine.submit_run("quick", "alice", 0).unwrap();
    harness.wait_for_run(&run_id).await;

    let err = harness.engine.issue_stream_token(&run_id).unwrap_err();
    assert_eq!(err.result_code(), Some(ResultCode::AlreadyTerminal));
}

#[tokio::test]
async fn test_stream_stats_track_viewers() {
    let harness = slow_harness().await;
    let run_id = harness.engine.submit_run("slow", "alice", 0).unwrap();
    harness.wait_until_running(&run_id).await;

    let token = harness.engine.issue_stream_token(&run_id).unwrap();
    let _one = harness
        .engine
        .open_stream(&run_id, Some(&token.token), "one")
        .unwrap();
    let _two = harness
        .engine
        .open_stream(&run_id, Some(&token.token), "two")
        .unwrap();

    let stats = harness.engine.stream_stats(&run_id).unwrap();
    assert_eq!(stats.subscribers, 2);
}
