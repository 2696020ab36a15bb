//! Rate limit enforcement for axum routes.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::ratelimit::{RateLimitOutcome, RateLimiter};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Body returned with a 429 response.
#[derive(Debug, Serialize)]
pub struct TooManyRequestsBody {
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// Add `X-RateLimit-*` headers for an outcome, plus `Retry-After` when the
/// request was rejected.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, outcome: &RateLimitOutcome) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(outcome.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(outcome.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(outcome.reset));

    if let Some(retry_after) = outcome.retry_after {
        headers.insert(
            axum::http::header::RETRY_AFTER,
            HeaderValue::from(retry_after),
        );
    }
}

/// Build the 429 response for a rejected outcome.
pub fn too_many_requests(outcome: &RateLimitOutcome) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(TooManyRequestsBody {
            error: "too many requests",
            retry_after_secs: outcome.retry_after,
        }),
    )
        .into_response();
    apply_rate_limit_headers(response.headers_mut(), outcome);
    response
}

/// Axum middleware that rate limits every request passing through it.
///
/// Install with `axum::middleware::from_fn_with_state(limiter, enforce)`.
pub async fn enforce(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let key = limiter.generate_key(&request);
    let outcome = limiter.check_limit(&key);

    if !outcome.success {
        warn!(
            key = %key,
            path = %request.uri().path(),
            method = %request.method(),
            retry_after = ?outcome.retry_after,
            "Rate limit exceeded"
        );
        return too_many_requests(&outcome);
    }

    debug!(
        key = %key,
        path = %request.uri().path(),
        remaining = outcome.remaining,
        "Request admitted"
    );

    let mut response = next.run(request).await;
    apply_rate_limit_headers(response.headers_mut(), &outcome);
    response
}
