//! Rate limiting logic and state management.

mod cache;
mod clock;
mod key;
mod limiter;
mod policy;

pub use cache::BoundedCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{default_key, ClientRequest, KeyGenerator, RequestInfo, UNKNOWN_KEY};
pub use limiter::{
    LimitConfig, RateLimitOutcome, RateLimiter, RateLimiterBuilder, DEFAULT_CACHE_CAPACITY,
    MAX_WINDOW_MS,
};
pub use policy::{PoliciesConfig, Policy, PolicySet};
