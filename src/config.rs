//! Configuration management for Postguard.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{PostguardError, Result};
use crate::ratelimit::{PoliciesConfig, DEFAULT_CACHE_CAPACITY};

/// Prefix for environment variable overrides, e.g.
/// `POSTGUARD__RATE_LIMITING__CACHE_CAPACITY=2000`.
const ENV_PREFIX: &str = "POSTGUARD";

/// Main configuration for the Postguard service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostguardConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Maximum number of distinct keys each limiter tracks
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Interval between sweeps of expired records, in seconds
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,

    /// Limits for each preconfigured policy
    #[serde(default)]
    pub policies: PoliciesConfig,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            purge_interval_secs: default_purge_interval(),
            policies: PoliciesConfig::default(),
        }
    }
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_purge_interval() -> u64 {
    60
}

impl RateLimitingConfig {
    /// The purge interval as a [`Duration`].
    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

impl PostguardConfig {
    /// Load configuration from an optional file plus environment overrides.
    ///
    /// The file format is picked from its extension. Environment variables
    /// use the `POSTGUARD` prefix and `__` to separate nested keys.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path));
        }

        let config: PostguardConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PostguardConfig = serde_yaml::from_str(yaml)
            .map_err(|e| PostguardError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every limit and size is usable.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limiting.cache_capacity == 0 {
            return Err(PostguardError::Config(
                "rate_limiting.cache_capacity must be greater than zero".to_string(),
            ));
        }
        if self.rate_limiting.purge_interval_secs == 0 {
            return Err(PostguardError::Config(
                "rate_limiting.purge_interval_secs must be greater than zero".to_string(),
            ));
        }
        self.rate_limiting.policies.validate()
    }
}
