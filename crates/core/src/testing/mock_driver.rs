//! Mock automation driver for testing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::driver::{
    Action, ActionOutcome, AutomationDriver, DriverError, DriverSession, PageContext,
};

use super::fixtures;

/// What an action matching a rule does.
#[derive(Debug, Clone)]
enum ActionRule {
    /// Runs but reports `success == false`.
    Fail(String),
    /// Returns the error.
    Error(DriverError),
}

#[derive(Debug, Default)]
struct DriverState {
    /// Remaining `open_session` failures.
    open_failures: Vec<DriverError>,
    /// Rules matched against `Action::describe()`.
    rules: Vec<(String, ActionRule)>,
    action_delay: Duration,
    open_delay: Duration,
    capture_fails: bool,
    opened: Vec<String>,
    closed: Vec<String>,
    executed: HashMap<String, Vec<Action>>,
    captures: usize,
}

/// Mock implementation of the AutomationDriver trait.
///
/// Provides controllable behavior for testing:
/// - Script failures for actions whose description contains a pattern
/// - Fail the next N session opens
/// - Slow actions down to exercise cancellation
/// - Record every executed action per run
///
/// # Example
///
/// ```rust,ignore
/// let driver = MockDriver::new();
/// driver.set_action_error("click Missing", DriverError::ElementNotFound("Missing".into())).await;
/// driver.set_action_error("click Crash", DriverError::SessionLost("browser crashed".into())).await;
///
/// // ... run a case ...
/// assert_eq!(driver.executed(&run_id).await.len(), 3);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<RwLock<DriverState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `open_session` calls fail, one error per call.
    pub async fn fail_next_opens(&self, errors: Vec<DriverError>) {
        self.state.write().await.open_failures = errors;
    }

    /// Actions whose description contains `pattern` run but fail.
    pub async fn set_action_failure(&self, pattern: &str, detail: &str) {
        self.state
            .write()
            .await
            .rules
            .push((pattern.to_string(), ActionRule::Fail(detail.to_string())));
    }

    /// Actions whose description contains `pattern` return `error`.
    pub async fn set_action_error(&self, pattern: &str, error: DriverError) {
        self.state
            .write()
            .await
            .rules
            .push((pattern.to_string(), ActionRule::Error(error)));
    }

    /// Delay every action by `delay`.
    pub async fn set_action_delay(&self, delay: Duration) {
        self.state.write().await.action_delay = delay;
    }

    /// Delay every `open_session` by `delay`, success or failure.
    pub async fn set_open_delay(&self, delay: Duration) {
        self.state.write().await.open_delay = delay;
    }

    pub async fn set_capture_fails(&self, fails: bool) {
        self.state.write().await.capture_fails = fails;
    }

    /// Run ids that got a session, in order.
    pub async fn opened_sessions(&self) -> Vec<String> {
        self.state.read().await.opened.clone()
    }

    pub async fn closed_sessions(&self) -> Vec<String> {
        self.state.read().await.closed.clone()
    }

    /// Actions executed for a run, in order.
    pub async fn executed(&self, run_id: &str) -> Vec<Action> {
        self.state
            .read()
            .await
            .executed
            .get(run_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn capture_count(&self) -> usize {
        self.state.read().await.captures
    }
}

#[async_trait]
impl AutomationDriver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    async fn open_session(&self, run_id: &str) -> Result<Arc<dyn DriverSession>, DriverError> {
        let delay = self.state.read().await.open_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().await;
        if !state.open_failures.is_empty() {
            return Err(state.open_failures.remove(0));
        }
        state.opened.push(run_id.to_string());

        Ok(Arc::new(MockSession {
            run_id: run_id.to_string(),
            session_id: format!("mock-session-{}", run_id),
            state: self.state.clone(),
        }))
    }
}

struct MockSession {
    run_id: String,
    session_id: String,
    state: Arc<RwLock<DriverState>>,
}

#[async_trait]
impl DriverSession for MockSession {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn execute(&self, action: &Action) -> Result<ActionOutcome, DriverError> {
        let (delay, rule) = {
            let mut state = self.state.write().await;
            state
                .executed
                .entry(self.run_id.clone())
                .or_default()
                .push(action.clone());

            let description = action.describe();
            let rule = state
                .rules
                .iter()
                .find(|(pattern, _)| description.contains(pattern.as_str()))
                .map(|(_, rule)| rule.clone());
            (state.action_delay, rule)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match rule {
            Some(ActionRule::Fail(detail)) => Ok(ActionOutcome::failed(detail)),
            Some(ActionRule::Error(error)) => Err(error),
            None => Ok(ActionOutcome::ok(format!("{} ok", action.kind()))),
        }
    }

    async fn capture_frame(&self) -> Result<Bytes, DriverError> {
        let mut state = self.state.write().await;
        state.captures += 1;
        if state.capture_fails {
            return Err(DriverError::ActionFailed("screenshot failed".into()));
        }
        Ok(fixtures::png_frame(32, 24, [40, 120, 200]))
    }

    async fn page_context(&self) -> Result<PageContext, DriverError> {
        Ok(PageContext {
            url: Some("https://app.test/".to_string()),
            title: Some("Mock page".to_string()),
            snapshot: None,
        })
    }

    async fn close_session(&self) -> Result<(), DriverError> {
        self.state.write().await.closed.push(self.run_id.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rules_match_description() {
        let driver = MockDriver::new();
        driver.set_action_failure("click Save", "button disabled").await;
        driver
            .set_action_error("click Gone", DriverError::SessionLost("crashed".into()))
            .await;

        let session = driver.open_session("run-1").await.unwrap();
        let save = Action::Click {
            target: "Save".into(),
        };
        let outcome = session.execute(&save).await.unwrap();
        assert!(!outcome.success);

        let gone = Action::Click {
            target: "Gone".into(),
        };
        assert!(session.execute(&gone).await.unwrap_err().is_fatal());

        let fine = Action::Press { key: "Enter".into() };
        assert!(session.execute(&fine).await.unwrap().success);
        assert_eq!(driver.executed("run-1").await.len(), 3);
    }

    #[tokio::test]
    async fn test_open_failures_are_consumed() {
        let driver = MockDriver::new();
        driver
            .fail_next_opens(vec![DriverError::Unavailable("down".into())])
            .await;

        assert!(driver.open_session("run-1").await.is_err());
        assert!(driver.open_session("run-1").await.is_ok());
        assert_eq!(driver.opened_sessions().await, vec!["run-1".to_string()]);
    }
}
