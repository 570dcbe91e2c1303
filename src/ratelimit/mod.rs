//! Rate limiting logic and state management.

mod limiter;
mod rules;
mod store;

pub use limiter::RateLimiter;
pub use rules::RateLimitRules;
pub use store::{KeyedWindowStore, DEFAULT_IDLE_TTL};
