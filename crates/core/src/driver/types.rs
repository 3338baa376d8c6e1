//! Types for the browser automation driver seam.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by an automation driver.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    /// The targeted element could not be located on the page.
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// The driver gave up waiting for the action to finish.
    #[error("Driver call timed out")]
    Timeout,

    /// The action ran but did not succeed.
    #[error("Action failed: {0}")]
    ActionFailed(String),

    /// The browser session is gone (crashed, closed, disconnected).
    #[error("Session lost: {0}")]
    SessionLost(String),

    /// The driver could not be reached or refused to open a session.
    #[error("Driver unavailable: {0}")]
    Unavailable(String),
}

impl DriverError {
    /// Returns true if the error makes the whole session unusable.
    ///
    /// Everything else is local to a single step.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DriverError::SessionLost(_))
    }
}

/// One structured browser action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Load a URL in the current tab.
    Navigate { url: String },
    /// Click an element identified by a selector or visible text.
    Click { target: String },
    /// Type text into an element.
    Type { target: String, text: String },
    /// Press a keyboard key (e.g. "Enter").
    Press { key: String },
    /// Pause for a fixed time.
    Wait { duration_ms: u64 },
    /// Check that the page shows the given text.
    AssertText { text: String },
}

impl Action {
    /// Short action kind, used for metrics labels and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Navigate { .. } => "navigate",
            Action::Click { .. } => "click",
            Action::Type { .. } => "type",
            Action::Press { .. } => "press",
            Action::Wait { .. } => "wait",
            Action::AssertText { .. } => "assert_text",
        }
    }

    /// Human readable one-line description.
    pub fn describe(&self) -> String {
        match self {
            Action::Navigate { url } => format!("navigate to {}", url),
            Action::Click { target } => format!("click {}", target),
            Action::Type { target, text } => format!("type \"{}\" into {}", text, target),
            Action::Press { key } => format!("press {}", key),
            Action::Wait { duration_ms } => format!("wait {}ms", duration_ms),
            Action::AssertText { text } => format!("assert page shows \"{}\"", text),
        }
    }
}

/// Result of executing one action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionOutcome {
    pub success: bool,
    pub detail: String,
}

impl ActionOutcome {
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
        }
    }
}

/// Snapshot of the page handed to the step interpreter.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Accessibility or DOM snapshot, if the driver provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
}

/// Factory for browser sessions.
#[async_trait]
pub trait AutomationDriver: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Open a fresh browser session for one run.
    async fn open_session(&self, run_id: &str) -> Result<Arc<dyn DriverSession>, DriverError>;
}

/// One open browser session, driven by exactly one run.
#[async_trait]
pub trait DriverSession: Send + Sync {
    /// Driver-side identifier of the session.
    fn session_id(&self) -> &str;

    /// Execute one action.
    ///
    /// `Ok` with `success == false` and the non-fatal error variants both
    /// describe a failed step; only `SessionLost` ends the run.
    async fn execute(&self, action: &Action) -> Result<ActionOutcome, DriverError>;

    /// Capture a screenshot of the current page (encoded image bytes).
    async fn capture_frame(&self) -> Result<Bytes, DriverError>;

    /// Current page context for the interpreter.
    async fn page_context(&self) -> Result<PageContext, DriverError>;

    /// Close the session. Errors are reported but the session is considered gone.
    async fn close_session(&self) -> Result<(), DriverError>;
}
