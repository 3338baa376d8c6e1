//! Common test utilities for E2E testing with mocks.
//!
//! This module provides a test fixture that creates an in-process server
//! with mock dependencies injected, enabling comprehensive E2E testing
//! without a browser sidecar.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use testpilot_core::{
    config::Config,
    store::{SqliteCaseCatalog, SqliteRunStore, TestCase},
    testing::{MockDriver, MockInterpreter},
    TestPilot,
};
use testpilot_server::state::AppState;

/// Re-export fixtures for test convenience
pub use testpilot_core::testing::fixtures;

/// Test fixture for E2E testing with mock dependencies.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_submit() {
///     let fixture = TestFixture::new(&[fixtures::test_case("login", "open /")]);
///
///     let response = fixture.post("/api/v1/runs", json!({ "case_id": "login" })).await;
///
///     assert_eq!(response.status, 202);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    pub state: Arc<AppState>,
    /// Mock driver - script step failures and delays
    pub driver: MockDriver,
    pub catalog: Arc<SqliteCaseCatalog>,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    pub fn new(cases: &[TestCase]) -> Self {
        Self::with_config(fixtures::fast_config(), cases)
    }

    pub fn with_config(config: Config, cases: &[TestCase]) -> Self {
        let driver = MockDriver::new();
        let catalog = Arc::new(fixtures::catalog(cases));
        let store = Arc::new(SqliteRunStore::in_memory().expect("Failed to create run store"));

        let engine = TestPilot::new(
            config,
            Arc::new(driver.clone()),
            Arc::new(MockInterpreter::new()),
            catalog.clone(),
            store,
        );
        engine.start();

        let state = Arc::new(AppState::new(engine));
        let router = testpilot_server::api::create_router(state.clone());

        Self {
            router,
            state,
            driver,
            catalog,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body), None).await
    }

    /// Send a POST request on behalf of a submitter.
    pub async fn post_as(&self, submitter: &str, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body), Some(submitter)).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None, None).await
    }

    /// Send a request and return the raw response (for streaming bodies).
    pub async fn raw(&self, request: Request<Body>) -> axum::response::Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request")
    }

    /// Poll a run until it reaches a terminal status.
    pub async fn wait_for_run(&self, run_id: &str) -> Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let response = self.get(&format!("/api/v1/runs/{}", run_id)).await;
            let status = response.body["status"].as_str().unwrap_or_default().to_string();
            if matches!(status.as_str(), "completed" | "failed" | "cancelled") {
                return response.body;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "run {} stuck in {:?}",
                run_id,
                status
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll a run until it is executing.
    pub async fn wait_until_running(&self, run_id: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let response = self.get(&format!("/api/v1/runs/{}", run_id)).await;
            if response.body["status"] == "running" {
                return;
            }
            assert!(tokio::time::Instant::now() < deadline, "run never started");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Send a request to the test server.
    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
        submitter: Option<&str>,
    ) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);
        if let Some(submitter) = submitter {
            request_builder = request_builder.header("x-submitter-id", submitter);
        }

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();
        let response = self.raw(request).await;

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
