//! Mapping of engine errors onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use testpilot_core::{queue::AdmissionError, EngineError, ResultCode};
use tracing::error;

use crate::metrics::API_RESULT_CODES;

/// Error body returned by every endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ResultCode>,
    pub error: String,
}

/// An engine error on its way to the client.
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0.result_code() {
            Some(ResultCode::QueueFull) => StatusCode::TOO_MANY_REQUESTS,
            Some(ResultCode::NotFound) => StatusCode::NOT_FOUND,
            Some(ResultCode::AlreadyTerminal) => StatusCode::CONFLICT,
            Some(ResultCode::Forbidden) => StatusCode::FORBIDDEN,
            Some(ResultCode::Accepted) => StatusCode::ACCEPTED,
            None => match &self.0 {
                EngineError::Admission(AdmissionError::InvalidTask(_)) => StatusCode::BAD_REQUEST,
                EngineError::Admission(AdmissionError::ShuttingDown) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.0.result_code();
        if let Some(code) = code {
            API_RESULT_CODES.with_label_values(&[code.as_str()]).inc();
        }
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }

        (
            status,
            Json(ErrorResponse {
                code,
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// Shorthand for handler results.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (
                EngineError::Admission(AdmissionError::QueueFull { capacity: 4 }),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (EngineError::NotFound("run x".into()), StatusCode::NOT_FOUND),
            (
                EngineError::AlreadyTerminal("run x".into()),
                StatusCode::CONFLICT,
            ),
            (EngineError::Forbidden("bad token".into()), StatusCode::FORBIDDEN),
            (
                EngineError::Admission(AdmissionError::InvalidTask("empty".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                EngineError::Admission(AdmissionError::ShuttingDown),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError(error).status(), expected);
        }
    }
}
