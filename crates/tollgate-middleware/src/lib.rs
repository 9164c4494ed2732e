//! Admission-control middleware for Tollgate.
//!
//! Requests flow through a fixed [`Pipeline`] of stages before reaching their
//! handler:
//!
//! 1. [`MetricsMiddleware`] counts the request by route template and method
//! 2. [`RateLimitMiddleware`] admits it against a shared [`TokenBucket`] or
//!    answers `429 Too Many Requests`
//!
//! Stages share per-request state through [`MiddlewareContext`].

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod context;
pub mod middleware;
pub mod pipeline;
pub mod stages;
pub mod types;

pub use context::MiddlewareContext;
pub use middleware::{BoxFuture, Middleware, Next};
pub use pipeline::{Pipeline, PipelineBuilder, Stage};
pub use stages::{
    Admission, MetricsMiddleware, RateLimitBuilder, RateLimitError, RateLimitMiddleware,
    TokenBucket,
};
pub use types::{Request, Response, ResponseExt};
