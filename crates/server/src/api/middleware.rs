//! Metrics middleware and the submitter extractor.

use axum::{
    body::Body,
    extract::FromRequestParts,
    http::{request::Parts, Request},
    middleware::Next,
    response::Response,
};
use std::future::Future;
use std::time::Instant;

use crate::metrics::{
    normalize_path, HTTP_REQUESTS_IN_FLIGHT, HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION,
};

/// Header naming who submits a run; counts against the per-submitter cap.
pub const SUBMITTER_HEADER: &str = "x-submitter-id";

/// Metrics middleware that tracks HTTP request duration and counts.
///
/// This middleware records:
/// - Request duration (histogram)
/// - Request count (counter)
/// - Requests in flight (gauge)
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = normalize_path(request.uri().path());

    HTTP_REQUESTS_IN_FLIGHT.inc();

    let response = next.run(request).await;

    HTTP_REQUESTS_IN_FLIGHT.dec();

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUEST_DURATION
        .with_label_values(&[&method, &path, &status])
        .observe(duration);
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();

    response
}

/// Extractor for the submitting principal.
///
/// Reads `x-submitter-id`; falls back to "anonymous".
#[derive(Debug, Clone)]
pub struct Submitter(pub String);

impl<S> FromRequestParts<S> for Submitter
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let submitter = parts
            .headers
            .get(SUBMITTER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or("anonymous")
            .to_string();
        std::future::ready(Ok(Submitter(submitter)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, middleware, routing::get, Router};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn whoami(Submitter(who): Submitter) -> String {
        who
    }

    fn app() -> Router {
        Router::new()
            .route("/whoami", get(whoami))
            .layer(middleware::from_fn(metrics_middleware))
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_submitter_from_header() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/whoami")
                    .header(SUBMITTER_HEADER, "ci-bot")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ci-bot");
    }

    #[tokio::test]
    async fn test_submitter_defaults_to_anonymous() {
        let response = app()
            .oneshot(Request::builder().uri("/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(body_text(response).await, "anonymous");
    }

    #[tokio::test]
    async fn test_metrics_middleware_counts_requests() {
        let before = HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/whoami", "200"])
            .get();

        app()
            .oneshot(Request::builder().uri("/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let after = HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/whoami", "200"])
            .get();
        assert!(after > before);
    }
}
