//! Rate limit decision service.
//!
//! Lets a front proxy or another process ask "may this caller proceed
//! under policy X?" over HTTP instead of linking the library.

use std::sync::Arc;

use axum::{
    body::{self, Body},
    extract::{Path, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::middleware::apply_rate_limit_headers;
use crate::ratelimit::{Policy, PolicySet, RateLimitOutcome};

/// Largest accepted check request body.
const MAX_BODY_BYTES: usize = 16 * 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub policies: Arc<PolicySet>,
}

/// Optional body of a check request.
#[derive(Debug, Default, Deserialize)]
pub struct CheckRequest {
    /// Explicit caller key; derived from the request when absent
    #[serde(default)]
    pub key: Option<String>,
}

/// Result of a check.
#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub policy: Policy,
    pub key: String,
    #[serde(flatten)]
    pub outcome: RateLimitOutcome,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Build the decision service router.
pub fn router(policies: Arc<PolicySet>) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/v1/check/{policy}", post(check))
        .with_state(AppState { policies })
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "postguard",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Check and record one request against a policy.
///
/// Responds 200 when admitted and 429 when rejected; both carry the
/// outcome as JSON and as `X-RateLimit-*` headers.
#[instrument(skip_all, fields(policy = %policy))]
pub async fn check(
    State(state): State<AppState>,
    Path(policy): Path<String>,
    request: Request<Body>,
) -> Response {
    let policy: Policy = match policy.parse() {
        Ok(policy) => policy,
        Err(e) => {
            warn!(error = %e, "Check requested for unknown policy");
            return error_response(StatusCode::NOT_FOUND, "unknown_policy", e.to_string());
        }
    };
    let limiter = state.policies.get(policy);

    let (parts, body) = request.into_parts();
    let bytes = match body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "Failed to read check request body");
            return error_response(StatusCode::BAD_REQUEST, "invalid_body", e.to_string());
        }
    };
    let check_request = if bytes.iter().all(u8::is_ascii_whitespace) {
        CheckRequest::default()
    } else {
        match serde_json::from_slice::<CheckRequest>(&bytes) {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "Malformed check request body");
                return error_response(StatusCode::BAD_REQUEST, "invalid_body", e.to_string());
            }
        }
    };

    let key = check_request
        .key
        .unwrap_or_else(|| limiter.generate_key(&parts));
    let outcome = limiter.check_limit(&key);

    let status = if outcome.success {
        debug!(key = %key, remaining = outcome.remaining, "Request admitted");
        StatusCode::OK
    } else {
        info!(key = %key, retry_after = ?outcome.retry_after, "Request rate limited");
        StatusCode::TOO_MANY_REQUESTS
    };

    let mut response = (
        status,
        Json(CheckResponse {
            policy,
            key,
            outcome,
        }),
    )
        .into_response();
    apply_rate_limit_headers(response.headers_mut(), &outcome);
    response
}

fn error_response(status: StatusCode, code: &'static str, error: String) -> Response {
    (status, Json(ErrorResponse { error, code })).into_response()
}
