//! HTTP automation sidecar client.
//!
//! The sidecar owns the real browser (Playwright, WebDriver, ...) and exposes
//! a small JSON API:
//!
//! ```text
//! POST   /sessions                    {"run_id": "..."} -> {"session_id": "..."}
//! POST   /sessions/{id}/actions       Action            -> ActionOutcome
//! GET    /sessions/{id}/screenshot                      -> image bytes
//! GET    /sessions/{id}/context                         -> PageContext
//! DELETE /sessions/{id}
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::DriverConfig;

use super::{Action, ActionOutcome, AutomationDriver, DriverError, DriverSession, PageContext};

#[derive(Debug, Serialize)]
struct OpenSessionRequest<'a> {
    run_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenSessionResponse {
    session_id: String,
}

/// Automation driver backed by an HTTP sidecar.
pub struct HttpAutomationDriver {
    client: Client,
    base_url: String,
}

impl HttpAutomationDriver {
    /// Create a new sidecar client.
    pub fn new(config: &DriverConfig) -> Result<Self, DriverError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .map_err(|e| DriverError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl AutomationDriver for HttpAutomationDriver {
    fn name(&self) -> &str {
        "http"
    }

    async fn open_session(&self, run_id: &str) -> Result<Arc<dyn DriverSession>, DriverError> {
        let url = format!("{}/sessions", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&OpenSessionRequest { run_id })
            .send()
            .await
            .map_err(|e| DriverError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DriverError::Unavailable(format!(
                "sidecar refused session ({}): {}",
                status, body
            )));
        }

        let opened: OpenSessionResponse = response
            .json()
            .await
            .map_err(|e| DriverError::Unavailable(format!("invalid session response: {}", e)))?;

        debug!(run_id, session_id = %opened.session_id, "Opened sidecar session");

        Ok(Arc::new(HttpDriverSession {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            session_id: opened.session_id,
        }))
    }
}

/// One sidecar session.
struct HttpDriverSession {
    client: Client,
    base_url: String,
    session_id: String,
}

impl HttpDriverSession {
    fn session_url(&self, suffix: &str) -> String {
        format!("{}/sessions/{}{}", self.base_url, self.session_id, suffix)
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, DriverError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(map_status(status, body))
    }
}

#[async_trait]
impl DriverSession for HttpDriverSession {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn execute(&self, action: &Action) -> Result<ActionOutcome, DriverError> {
        let response = self
            .client
            .post(self.session_url("/actions"))
            .json(action)
            .send()
            .await
            .map_err(map_transport_error)?;

        self.check(response)
            .await?
            .json::<ActionOutcome>()
            .await
            .map_err(|e| DriverError::ActionFailed(format!("invalid action response: {}", e)))
    }

    async fn capture_frame(&self) -> Result<Bytes, DriverError> {
        let response = self
            .client
            .get(self.session_url("/screenshot"))
            .send()
            .await
            .map_err(map_transport_error)?;

        self.check(response)
            .await?
            .bytes()
            .await
            .map_err(map_transport_error)
    }

    async fn page_context(&self) -> Result<PageContext, DriverError> {
        let response = self
            .client
            .get(self.session_url("/context"))
            .send()
            .await
            .map_err(map_transport_error)?;

        self.check(response)
            .await?
            .json::<PageContext>()
            .await
            .map_err(|e| DriverError::ActionFailed(format!("invalid context response: {}", e)))
    }

    async fn close_session(&self) -> Result<(), DriverError> {
        let response = self
            .client
            .delete(self.session_url(""))
            .send()
            .await
            .map_err(map_transport_error)?;

        match response.status() {
            // Already gone is fine when closing
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(()),
            status if status.is_success() => Ok(()),
            status => {
                let body = response.text().await.unwrap_or_default();
                warn!(session_id = %self.session_id, %status, "Sidecar refused to close session");
                Err(map_status(status, body))
            }
        }
    }
}

/// Map a sidecar error status onto the driver error taxonomy.
fn map_status(status: StatusCode, body: String) -> DriverError {
    match status {
        StatusCode::NOT_FOUND => DriverError::ElementNotFound(body),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => DriverError::Timeout,
        StatusCode::GONE => DriverError::SessionLost(body),
        StatusCode::SERVICE_UNAVAILABLE => DriverError::Unavailable(body),
        _ => DriverError::ActionFailed(format!("{}: {}", status, body)),
    }
}

/// Map a transport failure during an open session.
///
/// Losing the connection to the sidecar mid-run means the browser is gone.
fn map_transport_error(e: reqwest::Error) -> DriverError {
    if e.is_timeout() {
        DriverError::Timeout
    } else if e.is_connect() {
        DriverError::SessionLost(e.to_string())
    } else {
        DriverError::ActionFailed(e.to_string())
    }
}
