//! Step interpretation.
//!
//! Two implementations of `StepInterpreter`:
//! - `KeywordInterpreter`: rule-based, no external service
//! - `HttpInterpreter`: delegates to a remote (usually LLM-backed) service

mod http;
mod keyword;
mod types;

pub use http::HttpInterpreter;
pub use keyword::KeywordInterpreter;
pub use types::*;

use std::sync::Arc;

use crate::config::{InterpreterBackend, InterpreterConfig};

/// Build the configured interpreter.
pub fn create_interpreter(
    config: &InterpreterConfig,
) -> Result<Arc<dyn StepInterpreter>, InterpretError> {
    match config.backend {
        InterpreterBackend::Keyword => Ok(Arc::new(KeywordInterpreter::new())),
        InterpreterBackend::Http => {
            let url = config.url.as_deref().ok_or_else(|| {
                InterpretError::Unavailable("interpreter.url is not configured".to_string())
            })?;
            Ok(Arc::new(HttpInterpreter::new(url, config.timeout_secs)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_keyword_interpreter() {
        let interpreter = create_interpreter(&InterpreterConfig::default()).unwrap();
        assert_eq!(interpreter.name(), "keyword");
    }

    #[test]
    fn test_create_http_interpreter_requires_url() {
        let config = InterpreterConfig {
            backend: InterpreterBackend::Http,
            url: None,
            timeout_secs: 5,
        };
        assert!(create_interpreter(&config).is_err());
    }
}
