//! Error types for Postguard.

use thiserror::Error;

/// Main error type for Postguard operations.
///
/// The request path never produces one of these: a rejected request is a
/// normal [`RateLimitOutcome`](crate::ratelimit::RateLimitOutcome), not an
/// error. Errors only come out of construction and configuration.
#[derive(Error, Debug)]
pub enum PostguardError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A limit with a zero window or zero request ceiling
    #[error("Invalid limit: {0}")]
    InvalidLimit(String),

    /// A policy name that does not match any preconfigured policy
    #[error("Unknown policy: {0}")]
    UnknownPolicy(String),

    /// Errors raised while assembling configuration sources
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Postguard operations.
pub type Result<T> = std::result::Result<T, PostguardError>;
