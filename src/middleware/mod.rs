pub mod rate_limiting;

pub use rate_limiting::{FixedWindowRateLimiter, RateLimitDecision, RateLimitMetricsSnapshot};
