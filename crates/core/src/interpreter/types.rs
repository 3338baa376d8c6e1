//! Types for the step interpreter seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::driver::{Action, PageContext};

/// Errors that prevent the interpreter from answering at all.
///
/// "No action found" is not an error; it is reported through
/// [`ParsedStep::error`] with `action == None`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InterpretError {
    #[error("Interpreter unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid interpreter response: {0}")]
    InvalidResponse(String),
}

/// One interpretation result: the next action plus the text left over.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParsedStep {
    /// The next action, if one could be derived.
    #[serde(default)]
    pub action: Option<Action>,
    /// Step text that remains after consuming this action.
    #[serde(default)]
    pub remaining: String,
    /// Why no action was produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ParsedStep {
    pub fn action(action: Action, remaining: impl Into<String>) -> Self {
        Self {
            action: Some(action),
            remaining: remaining.into(),
            error: None,
        }
    }

    pub fn no_action(remaining: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            action: None,
            remaining: remaining.into(),
            error: Some(reason.into()),
        }
    }
}

/// Converts free-text step descriptions into structured actions.
#[async_trait]
pub trait StepInterpreter: Send + Sync {
    /// Name of this interpreter for logging.
    fn name(&self) -> &str;

    /// Derive the next action from the remaining step text.
    async fn parse_next(
        &self,
        remaining: &str,
        context: &PageContext,
    ) -> Result<ParsedStep, InterpretError>;
}
