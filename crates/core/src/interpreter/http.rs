//! Remote step interpreter.
//!
//! Posts the remaining step text plus the current page context to
//! `{url}/parse` and expects a [`ParsedStep`] back.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::driver::PageContext;

use super::{InterpretError, ParsedStep, StepInterpreter};

#[derive(Debug, Serialize)]
struct ParseRequest<'a> {
    remaining: &'a str,
    context: &'a PageContext,
}

/// Interpreter that delegates to an HTTP service.
pub struct HttpInterpreter {
    client: Client,
    endpoint: String,
}

impl HttpInterpreter {
    pub fn new(url: &str, timeout_secs: u32) -> Result<Self, InterpretError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs as u64))
            .build()
            .map_err(|e| {
                InterpretError::Unavailable(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}/parse", url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl StepInterpreter for HttpInterpreter {
    fn name(&self) -> &str {
        "http"
    }

    async fn parse_next(
        &self,
        remaining: &str,
        context: &PageContext,
    ) -> Result<ParsedStep, InterpretError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&ParseRequest { remaining, context })
            .send()
            .await
            .map_err(|e| InterpretError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InterpretError::Unavailable(format!("{}: {}", status, body)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| InterpretError::Unavailable(e.to_string()))?;
        let parsed = parse_response(&body)?;

        debug!(
            action = parsed.action.as_ref().map(|a| a.kind()),
            remaining_len = parsed.remaining.len(),
            "Interpreter answered"
        );

        Ok(parsed)
    }
}

fn parse_response(body: &str) -> Result<ParsedStep, InterpretError> {
    serde_json::from_str(body).map_err(|e| InterpretError::InvalidResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Action;

    #[test]
    fn test_parse_response_with_action() {
        let body = r#"{"action":{"type":"click","target":"Login"},"remaining":"wait 1 s"}"#;
        let parsed = parse_response(body).unwrap();
        assert_eq!(
            parsed.action,
            Some(Action::Click {
                target: "Login".into()
            })
        );
        assert_eq!(parsed.remaining, "wait 1 s");
        assert!(parsed.error.is_none());
    }

    #[test]
    fn test_parse_response_without_action() {
        let body = r#"{"action":null,"remaining":"hmm","error":"ambiguous"}"#;
        let parsed = parse_response(body).unwrap();
        assert!(parsed.action.is_none());
        assert_eq!(parsed.error.as_deref(), Some("ambiguous"));
    }

    #[test]
    fn test_parse_response_rejects_garbage() {
        assert!(matches!(
            parse_response("<html>"),
            Err(InterpretError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_endpoint_built_from_base_url() {
        let interpreter = HttpInterpreter::new("http://localhost:9400/", 5).unwrap();
        assert_eq!(interpreter.endpoint, "http://localhost:9400/parse");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unavailable() {
        let interpreter = HttpInterpreter::new("http://127.0.0.1:1", 1).unwrap();
        let result = interpreter
            .parse_next("click Login", &PageContext::default())
            .await;
        assert!(matches!(result, Err(InterpretError::Unavailable(_))));
    }
}
