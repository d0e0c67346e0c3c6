//! Rate limiting logic and state management.

mod counter;
mod headers;
mod key;
mod limiter;
mod rules;
mod store;

pub use counter::RateLimitEntry;
pub use headers::{
    rate_limit_headers, retry_after_secs, LIMIT_HEADER, REMAINING_HEADER, RESET_HEADER,
    RETRY_AFTER_HEADER,
};
pub use key::{get_client_ip, get_rate_limit_key, RateLimitKey, FALLBACK_CLIENT_IP};
pub use limiter::{RateLimitResult, RateLimiter};
pub use rules::{RateLimitConfig, RouteClass, RoutePolicies};
pub use store::{spawn_sweeper, CounterStore, MemoryStore, StoreError};
