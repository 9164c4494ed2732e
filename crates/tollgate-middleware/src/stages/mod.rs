//! Built-in pipeline stages.
//!
//! | Order | Stage | Purpose |
//! |-------|-------|---------|
//! | 1 | Metrics | Count every offered request by route and method |
//! | 2 | Rate Limit | Admit or reject against the shared token bucket |
//!
//! Counting runs first so rejected requests still show up in the counters.

pub mod metrics;
pub mod rate_limit;

pub use metrics::MetricsMiddleware;
pub use rate_limit::{
    Admission, RateLimitBuilder, RateLimitError, RateLimitMiddleware, TokenBucket,
};
