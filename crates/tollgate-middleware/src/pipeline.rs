//! Fixed-order admission pipeline.
//!
//! Every request passes through the same ordered list of stages before it
//! reaches its handler. The order is set when the pipeline is built and never
//! changes afterwards.
//!
//! The standard pipeline is:
//!
//! 1. **Metrics** - count the request by route template and method
//! 2. **Rate Limit** - admit against the shared token bucket or answer 429
//!
//! Any stage may answer the request itself, in which case later stages and
//! the handler do not run.

use std::sync::Arc;

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::stages::{MetricsMiddleware, RateLimitMiddleware};
use crate::types::{Request, Response};

/// A type-erased middleware that can be stored in a vector.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// The stages of the standard pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Per-route request counting.
    Metrics,
    /// Token-bucket admission.
    RateLimit,
}

impl Stage {
    /// Returns every standard stage in execution order.
    #[must_use]
    pub const fn all() -> [Self; 2] {
        [Self::Metrics, Self::RateLimit]
    }

    /// Returns the stage name reported by its middleware.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Metrics => "metrics",
            Self::RateLimit => "rate-limit",
        }
    }
}

/// The ordered middleware pipeline.
///
/// # Example
///
/// ```ignore
/// use tollgate_middleware::{Pipeline, MetricsMiddleware, RateLimitMiddleware};
///
/// let pipeline = Pipeline::standard(metrics, rate_limit);
/// let response = pipeline
///     .process(MiddlewareContext::for_route("/users"), request, handler)
///     .await;
/// ```
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<BoxedMiddleware>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl Pipeline {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Creates the standard pipeline: metrics, then rate limiting.
    ///
    /// Passing `None` for the rate limiter leaves admission open.
    #[must_use]
    pub fn standard(metrics: MetricsMiddleware, rate_limit: Option<RateLimitMiddleware>) -> Self {
        let builder = Self::builder().add_stage(metrics);
        match rate_limit {
            Some(rate_limit) => builder.add_stage(rate_limit).build(),
            None => builder.build(),
        }
    }

    /// Creates a pipeline with no stages; requests go straight to the handler.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Runs a request through every stage and then the handler.
    pub async fn process<H>(&self, mut ctx: MiddlewareContext, request: Request, handler: H) -> Response
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'static,
    {
        let next = self.build_chain(handler);
        next.run(&mut ctx, request).await
    }

    /// Builds the chain from back to front so the first stage runs first.
    fn build_chain<'a, H>(&'a self, handler: H) -> Next<'a>
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'a,
    {
        let mut next = Next::handler(handler);
        for middleware in self.stages.iter().rev() {
            next = Next::new(middleware.as_ref(), next);
        }
        next
    }

    /// Returns the names of all stages in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|mw| mw.name()).collect()
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

/// Builder for constructing a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<BoxedMiddleware>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage. Stages run in the order they are added.
    #[must_use]
    pub fn add_stage<M: Middleware>(mut self, middleware: M) -> Self {
        self.stages.push(Arc::new(middleware));
        self
    }

    /// Builds the pipeline.
    #[must_use]
    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages,
        }
    }
}
