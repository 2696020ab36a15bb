//! Core sliding-window rate limiter implementation.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::cache::BoundedCache;
use super::clock::{Clock, SystemClock};
use super::key::{default_key, ClientRequest, KeyGenerator};
use crate::error::{PostguardError, Result};

/// Default maximum number of distinct keys tracked per limiter.
pub const DEFAULT_CACHE_CAPACITY: usize = 500;

/// Longest accepted window. Timestamps are signed milliseconds, so the
/// window must fit in an `i64`.
pub const MAX_WINDOW_MS: u64 = i64::MAX as u64;

/// Configuration for a rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Length of the sliding window in milliseconds
    pub window_ms: u64,
    /// Maximum admitted requests per key within any window
    pub max_requests: u32,
}

impl LimitConfig {
    pub const fn new(window_ms: u64, max_requests: u32) -> Self {
        Self {
            window_ms,
            max_requests,
        }
    }

    /// Reject zero or oversized windows and zero request ceilings.
    pub fn validate(&self) -> Result<()> {
        if self.window_ms == 0 {
            return Err(PostguardError::InvalidLimit(
                "window_ms must be greater than zero".to_string(),
            ));
        }
        if self.window_ms > MAX_WINDOW_MS {
            return Err(PostguardError::InvalidLimit(format!(
                "window_ms must not exceed {}",
                MAX_WINDOW_MS
            )));
        }
        if self.max_requests == 0 {
            return Err(PostguardError::InvalidLimit(
                "max_requests must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// The outcome of a single rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitOutcome {
    /// Whether the request was admitted
    pub success: bool,
    /// The configured request ceiling
    pub limit: u32,
    /// Requests left in the current window after this call
    pub remaining: u32,
    /// Unix seconds of the oldest request still in the window
    pub reset: i64,
    /// Seconds until the window has room again; only set when rejected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// An in-memory sliding-window rate limiter.
///
/// Each key owns the list of timestamps of its admitted requests inside the
/// window. Lists live in a bounded LRU cache whose entries also expire one
/// window after their last admission, so idle keys cost nothing for long.
///
/// This struct is thread-safe and can be shared across multiple tasks. A
/// check holds the cache lock for its whole read-filter-write sequence, so
/// concurrent requests for one key cannot both slip under the ceiling.
pub struct RateLimiter {
    config: LimitConfig,
    /// Per-key admitted request timestamps, in arrival order
    windows: Mutex<BoundedCache<String, Vec<i64>>>,
    key_generator: Option<KeyGenerator>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a rate limiter with the default cache size and the system clock.
    pub fn new(config: LimitConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Start building a rate limiter with non-default settings.
    pub fn builder(config: LimitConfig) -> RateLimiterBuilder {
        RateLimiterBuilder {
            config,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            key_generator: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// The limit this limiter enforces.
    pub fn limit_config(&self) -> LimitConfig {
        self.config
    }

    /// Check and record a request for `key`.
    ///
    /// Timestamps that have left the window are dropped first. If fewer
    /// than `max_requests` remain the request is admitted and its timestamp
    /// recorded; otherwise it is rejected and nothing is recorded.
    pub fn check_limit(&self, key: &str) -> RateLimitOutcome {
        let now = self.clock.now_millis();
        // Bounded by MAX_WINDOW_MS at construction
        let window_ms = self.config.window_ms as i64;
        let window_start = now.saturating_sub(window_ms);
        let max_requests = self.config.max_requests as usize;

        let mut guard = self.windows.lock();
        let windows = &mut *guard;

        let (success, count, oldest) = match windows.get_mut(key, now) {
            Some(timestamps) => {
                timestamps.retain(|&t| t > window_start);
                let success = timestamps.len() < max_requests;
                if success {
                    timestamps.push(now);
                }
                let result = (success, timestamps.len(), timestamps.first().copied());
                if success {
                    windows.renew(key, now);
                }
                result
            }
            None => {
                // max_requests is at least one, so a fresh key is always admitted
                windows.insert(key.to_string(), vec![now], now);
                (true, 1, Some(now))
            }
        };
        drop(guard);

        let remaining = max_requests.saturating_sub(count) as u32;
        let reset_millis = oldest.unwrap_or_else(|| now.saturating_add(window_ms));
        let retry_after = if success {
            None
        } else {
            let wait_ms = reset_millis
                .saturating_add(window_ms)
                .saturating_sub(now)
                .max(1);
            Some(ceil_div(wait_ms, 1000) as u64)
        };

        RateLimitOutcome {
            success,
            limit: self.config.max_requests,
            remaining,
            reset: ceil_div(reset_millis, 1000),
            retry_after,
        }
    }

    /// Whether a request for `key` should be rejected.
    ///
    /// Same side effects as [`check_limit`](Self::check_limit).
    pub fn is_rate_limited(&self, key: &str) -> bool {
        !self.check_limit(key).success
    }

    /// Derive the caller key for a request.
    ///
    /// Uses the configured key generator, or [`default_key`] if none was set.
    pub fn generate_key(&self, request: &dyn ClientRequest) -> String {
        match &self.key_generator {
            Some(generator) => generator(request),
            None => default_key(request),
        }
    }

    /// Forget everything recorded for `key`.
    ///
    /// Returns whether a record existed.
    pub fn reset_key(&self, key: &str) -> bool {
        self.windows.lock().remove(key).is_some()
    }

    /// Drop records whose time-to-live has elapsed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        self.windows.lock().purge_expired(now)
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().len()
    }

    /// Clear all records.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.windows.lock().clear();
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("custom_key_generator", &self.key_generator.is_some())
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RateLimiter`].
pub struct RateLimiterBuilder {
    config: LimitConfig,
    cache_capacity: usize,
    key_generator: Option<KeyGenerator>,
    clock: Arc<dyn Clock>,
}

impl RateLimiterBuilder {
    /// Maximum number of distinct keys tracked at once.
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Replace the default address-based key derivation.
    pub fn key_generator(mut self, generator: KeyGenerator) -> Self {
        self.key_generator = Some(generator);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<RateLimiter> {
        self.config.validate()?;
        if self.cache_capacity == 0 {
            return Err(PostguardError::InvalidLimit(
                "cache capacity must be greater than zero".to_string(),
            ));
        }

        Ok(RateLimiter {
            config: self.config,
            windows: Mutex::new(BoundedCache::new(
                self.cache_capacity,
                self.config.window_ms,
            )),
            key_generator: self.key_generator,
            clock: self.clock,
        })
    }
}

/// Ceiling division for non-negative millisecond values.
fn ceil_div(value: i64, divisor: i64) -> i64 {
    value.saturating_add(divisor - 1).div_euclid(divisor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::key::RequestInfo;

    fn limiter_with_clock(window_ms: u64, max_requests: u32) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = RateLimiter::builder(LimitConfig::new(window_ms, max_requests))
            .clock(clock.clone())
            .build()
            .unwrap();
        (limiter, clock)
    }

    #[test]
    fn test_rate_limiter_creation() {
        let limiter = RateLimiter::new(LimitConfig::new(60_000, 5)).unwrap();
        assert_eq!(limiter.tracked_keys(), 0);
        assert_eq!(limiter.limit_config(), LimitConfig::new(60_000, 5));
    }

    #[test]
    fn test_rejects_invalid_config() {
        assert!(matches!(
            RateLimiter::new(LimitConfig::new(0, 5)),
            Err(PostguardError::InvalidLimit(_))
        ));
        assert!(matches!(
            RateLimiter::new(LimitConfig::new(1_000, 0)),
            Err(PostguardError::InvalidLimit(_))
        ));
        assert!(RateLimiter::builder(LimitConfig::new(1_000, 1))
            .cache_capacity(0)
            .build()
            .is_err());
    }

    #[test]
    fn test_rejects_window_beyond_timestamp_range() {
        let err = LimitConfig::new(u64::MAX, 1).validate().unwrap_err();
        assert!(matches!(err, PostguardError::InvalidLimit(_)));
        assert!(RateLimiter::new(LimitConfig::new(MAX_WINDOW_MS + 1, 1)).is_err());
    }

    #[test]
    fn test_largest_window_still_limits() {
        let (limiter, clock) = limiter_with_clock(MAX_WINDOW_MS, 1);
        clock.set(1_700_000_000_000);

        let outcome = limiter.check_limit("k");
        assert!(outcome.success);
        assert_eq!(outcome.reset, 1_700_000_000);

        let outcome = limiter.check_limit("k");
        assert!(!outcome.success);
        assert_eq!(outcome.remaining, 0);
        assert!(outcome.retry_after.unwrap() > 0);
        assert!(limiter.is_rate_limited("k"));
    }

    #[test]
    fn test_sliding_window_scenario() {
        let (limiter, clock) = limiter_with_clock(1_000, 3);

        for (at, expected_remaining) in [(0, 2), (100, 1), (200, 0)] {
            clock.set(at);
            let outcome = limiter.check_limit("client");
            assert!(outcome.success, "request at t={} should be admitted", at);
            assert_eq!(outcome.remaining, expected_remaining);
            assert_eq!(outcome.limit, 3);
        }

        clock.set(300);
        let outcome = limiter.check_limit("client");
        assert!(!outcome.success);
        assert_eq!(outcome.remaining, 0);

        // The entry from t=0 has aged out
        clock.set(1_100);
        assert!(limiter.check_limit("client").success);
    }

    #[test]
    fn test_window_slides_instead_of_resetting() {
        let (limiter, clock) = limiter_with_clock(1_000, 2);

        clock.set(0);
        assert!(limiter.check_limit("k").success);
        clock.set(600);
        assert!(limiter.check_limit("k").success);
        clock.set(900);
        assert!(!limiter.check_limit("k").success);

        // Only the t=0 entry has left; t=600 still counts
        clock.set(1_001);
        let outcome = limiter.check_limit("k");
        assert!(outcome.success);
        assert_eq!(outcome.remaining, 0);

        clock.set(1_200);
        assert!(!limiter.check_limit("k").success);
    }

    #[test]
    fn test_rejected_attempts_are_not_recorded() {
        let (limiter, clock) = limiter_with_clock(1_000, 1);

        clock.set(0);
        assert!(limiter.check_limit("k").success);
        for at in [100, 500, 900] {
            clock.set(at);
            assert!(!limiter.check_limit("k").success);
        }

        // Had the rejections been recorded, t=900 would still block this
        clock.set(1_000);
        assert!(limiter.check_limit("k").success);
    }

    #[test]
    fn test_remaining_is_non_increasing() {
        let (limiter, clock) = limiter_with_clock(60_000, 10);

        let mut previous = u32::MAX;
        for i in 0..15 {
            clock.set(i * 10);
            let outcome = limiter.check_limit("k");
            assert!(outcome.remaining <= previous);
            previous = outcome.remaining;
        }
        assert_eq!(previous, 0);
    }

    #[test]
    fn test_keys_are_independent() {
        let (limiter, _clock) = limiter_with_clock(60_000, 2);

        assert!(limiter.check_limit("a").success);
        assert!(limiter.check_limit("a").success);
        assert!(!limiter.check_limit("a").success);

        let outcome = limiter.check_limit("b");
        assert!(outcome.success);
        assert_eq!(outcome.remaining, 1);
    }

    #[test]
    fn test_reset_reports_oldest_timestamp() {
        let (limiter, clock) = limiter_with_clock(60_000, 2);

        clock.set(1_700_000_000_500);
        let outcome = limiter.check_limit("k");
        assert_eq!(outcome.reset, 1_700_000_001);
        assert_eq!(outcome.retry_after, None);

        clock.set(1_700_000_010_000);
        limiter.check_limit("k");
        clock.set(1_700_000_020_000);
        let outcome = limiter.check_limit("k");
        assert!(!outcome.success);
        assert_eq!(outcome.reset, 1_700_000_001);
        // Oldest entry leaves the window at ...060_500; 40.5s from now
        assert_eq!(outcome.retry_after, Some(41));
    }

    #[test]
    fn test_is_rate_limited() {
        let (limiter, _clock) = limiter_with_clock(60_000, 1);

        assert!(!limiter.is_rate_limited("k"));
        assert!(limiter.is_rate_limited("k"));
    }

    #[test]
    fn test_evicted_key_starts_fresh() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = RateLimiter::builder(LimitConfig::new(60_000, 1))
            .cache_capacity(2)
            .clock(clock.clone())
            .build()
            .unwrap();

        assert!(limiter.check_limit("a").success);
        assert!(!limiter.check_limit("a").success);
        limiter.check_limit("b");
        limiter.check_limit("c");
        assert_eq!(limiter.tracked_keys(), 2);

        // "a" was least recently used and got evicted
        assert!(limiter.check_limit("a").success);
    }

    #[test]
    fn test_idle_record_expires() {
        let (limiter, clock) = limiter_with_clock(1_000, 1);

        limiter.check_limit("k");
        assert_eq!(limiter.purge_expired(), 0);

        clock.set(1_000);
        assert_eq!(limiter.purge_expired(), 1);
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_reset_key_and_clear() {
        let (limiter, _clock) = limiter_with_clock(60_000, 1);

        limiter.check_limit("k");
        assert!(limiter.is_rate_limited("k"));
        assert!(limiter.reset_key("k"));
        assert!(!limiter.reset_key("k"));
        assert!(!limiter.is_rate_limited("k"));

        limiter.check_limit("other");
        limiter.clear();
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_empty_key_is_an_ordinary_key() {
        let (limiter, _clock) = limiter_with_clock(60_000, 1);

        assert!(limiter.check_limit("").success);
        assert!(!limiter.check_limit("").success);
        assert!(limiter.check_limit("x").success);
    }

    #[test]
    fn test_generate_key_default_and_custom() {
        let request = RequestInfo::new().with_header("x-forwarded-for", "1.2.3.4, 5.6.7.8");

        let limiter = RateLimiter::new(LimitConfig::new(60_000, 5)).unwrap();
        assert_eq!(limiter.generate_key(&request), "1.2.3.4");

        let limiter = RateLimiter::builder(LimitConfig::new(60_000, 5))
            .key_generator(Arc::new(|req: &dyn ClientRequest| {
                format!("session:{}", req.header("x-session").unwrap_or("anonymous"))
            }))
            .build()
            .unwrap();
        assert_eq!(limiter.generate_key(&request), "session:anonymous");
    }

    #[test]
    fn test_concurrent_checks_respect_limit() {
        let limiter = Arc::new(RateLimiter::new(LimitConfig::new(60_000, 50)).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    (0..20).filter(|_| limiter.check_limit("shared").success).count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 50);
    }

    #[test]
    fn test_ceil_div() {
        assert_eq!(ceil_div(0, 1000), 0);
        assert_eq!(ceil_div(1, 1000), 1);
        assert_eq!(ceil_div(1000, 1000), 1);
        assert_eq!(ceil_div(1001, 1000), 2);
    }
}
