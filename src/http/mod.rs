//! HTTP adapter for the rate limiters.

mod middleware;
mod server;
mod service;

pub use middleware::{
    apply_rate_limit_headers, enforce, too_many_requests, TooManyRequestsBody, X_RATELIMIT_LIMIT,
    X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use server::{spawn_purge_task, HttpServer};
pub use service::{router, AppState, CheckRequest, CheckResponse, ErrorResponse, HealthResponse};
