//! Preconfigured rate limit policies.
//!
//! The board protects four kinds of endpoints, each with its own limiter.
//! Limiters are owned by a [`PolicySet`] that the application constructs
//! once and hands to whatever needs it; nothing here is global.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::clock::{Clock, SystemClock};
use super::limiter::{LimitConfig, RateLimiter};
use crate::config::RateLimitingConfig;
use crate::error::{PostguardError, Result};

/// The endpoint families that get their own limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Creating threads and posts
    Posting,
    /// Login attempts
    Login,
    /// Everything else under the API
    Api,
    /// Password reset requests
    PasswordReset,
}

impl Policy {
    pub const ALL: [Policy; 4] = [
        Policy::Posting,
        Policy::Login,
        Policy::Api,
        Policy::PasswordReset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Policy::Posting => "posting",
            Policy::Login => "login",
            Policy::Api => "api",
            Policy::PasswordReset => "password_reset",
        }
    }

    /// The limit applied when configuration does not override it.
    pub fn default_limit(&self) -> LimitConfig {
        match self {
            Policy::Posting => LimitConfig::new(60_000, 5),
            Policy::Login => LimitConfig::new(900_000, 3),
            Policy::Api => LimitConfig::new(60_000, 100),
            Policy::PasswordReset => LimitConfig::new(3_600_000, 3),
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Policy {
    type Err = PostguardError;

    fn from_str(s: &str) -> Result<Self> {
        Policy::ALL
            .into_iter()
            .find(|policy| policy.as_str() == s)
            .ok_or_else(|| PostguardError::UnknownPolicy(s.to_string()))
    }
}

/// Per-policy limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoliciesConfig {
    #[serde(default = "default_posting")]
    pub posting: LimitConfig,

    #[serde(default = "default_login")]
    pub login: LimitConfig,

    #[serde(default = "default_api")]
    pub api: LimitConfig,

    #[serde(default = "default_password_reset")]
    pub password_reset: LimitConfig,
}

impl Default for PoliciesConfig {
    fn default() -> Self {
        Self {
            posting: default_posting(),
            login: default_login(),
            api: default_api(),
            password_reset: default_password_reset(),
        }
    }
}

fn default_posting() -> LimitConfig {
    Policy::Posting.default_limit()
}

fn default_login() -> LimitConfig {
    Policy::Login.default_limit()
}

fn default_api() -> LimitConfig {
    Policy::Api.default_limit()
}

fn default_password_reset() -> LimitConfig {
    Policy::PasswordReset.default_limit()
}

impl PoliciesConfig {
    /// The configured limit for a policy.
    pub fn limit(&self, policy: Policy) -> LimitConfig {
        match policy {
            Policy::Posting => self.posting,
            Policy::Login => self.login,
            Policy::Api => self.api,
            Policy::PasswordReset => self.password_reset,
        }
    }

    /// Validate every policy's limit.
    pub fn validate(&self) -> Result<()> {
        for policy in Policy::ALL {
            self.limit(policy).validate().map_err(|e| {
                PostguardError::Config(format!("policy '{}': {}", policy, e))
            })?;
        }
        Ok(())
    }
}

/// One independent limiter per policy.
///
/// The same caller key is tracked separately under each policy.
#[derive(Debug, Clone)]
pub struct PolicySet {
    posting: Arc<RateLimiter>,
    login: Arc<RateLimiter>,
    api: Arc<RateLimiter>,
    password_reset: Arc<RateLimiter>,
}

impl PolicySet {
    /// Build limiters from configuration using the system clock.
    pub fn new(config: &RateLimitingConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build limiters from configuration sharing one clock.
    pub fn with_clock(config: &RateLimitingConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let build = |policy: Policy| -> Result<Arc<RateLimiter>> {
            let limiter = RateLimiter::builder(config.policies.limit(policy))
                .cache_capacity(config.cache_capacity)
                .clock(clock.clone())
                .build()
                .map_err(|e| PostguardError::Config(format!("policy '{}': {}", policy, e)))?;
            Ok(Arc::new(limiter))
        };

        Ok(Self {
            posting: build(Policy::Posting)?,
            login: build(Policy::Login)?,
            api: build(Policy::Api)?,
            password_reset: build(Policy::PasswordReset)?,
        })
    }

    /// The limiter for a policy.
    pub fn get(&self, policy: Policy) -> &Arc<RateLimiter> {
        match policy {
            Policy::Posting => &self.posting,
            Policy::Login => &self.login,
            Policy::Api => &self.api,
            Policy::PasswordReset => &self.password_reset,
        }
    }

    /// Drop expired records from every limiter. Returns the total removed.
    pub fn purge_expired(&self) -> usize {
        Policy::ALL
            .into_iter()
            .map(|policy| self.get(policy).purge_expired())
            .sum()
    }
}
