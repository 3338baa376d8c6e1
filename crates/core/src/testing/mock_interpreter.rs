//! Mock step interpreter for testing.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::driver::PageContext;
use crate::interpreter::{InterpretError, KeywordInterpreter, ParsedStep, StepInterpreter};

/// Step interpreter that records its inputs.
///
/// Parses with the keyword rules unless told to be unavailable.
#[derive(Debug, Clone, Default)]
pub struct MockInterpreter {
    keyword: KeywordInterpreter,
    calls: Arc<RwLock<Vec<String>>>,
    unavailable: Arc<RwLock<Option<String>>>,
}

impl MockInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `parse_next` input, in order.
    pub async fn calls(&self) -> Vec<String> {
        self.calls.read().await.clone()
    }

    /// Fail every call with `InterpretError::Unavailable`.
    pub async fn set_unavailable(&self, reason: &str) {
        *self.unavailable.write().await = Some(reason.to_string());
    }

    pub async fn clear_unavailable(&self) {
        *self.unavailable.write().await = None;
    }
}

#[async_trait]
impl StepInterpreter for MockInterpreter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn parse_next(
        &self,
        remaining: &str,
        _context: &PageContext,
    ) -> Result<ParsedStep, InterpretError> {
        self.calls.write().await.push(remaining.to_string());
        if let Some(reason) = self.unavailable.read().await.clone() {
            return Err(InterpretError::Unavailable(reason));
        }
        Ok(self.keyword.parse(remaining))
    }
}
