//! Per-request state carried through the middleware chain.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

/// Context that flows through the middleware chain.
///
/// The server fills in the matched route template before the chain runs, so
/// stages key their work on the route rather than the raw request path.
///
/// # Example
///
/// ```
/// use tollgate_middleware::context::MiddlewareContext;
///
/// let ctx = MiddlewareContext::for_route("/users");
/// assert_eq!(ctx.route(), Some("/users"));
/// ```
#[derive(Debug)]
pub struct MiddlewareContext {
    /// Unique identifier for this request.
    request_id: Uuid,

    /// Matched route template, `None` when no route matched.
    route: Option<String>,

    /// When the request started processing.
    started_at: Instant,

    /// Type-erased extension data.
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl MiddlewareContext {
    /// Creates a context with a fresh request ID and no matched route.
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_id: Uuid::now_v7(),
            route: None,
            started_at: Instant::now(),
            extensions: HashMap::new(),
        }
    }

    /// Creates a context for a matched route template.
    #[must_use]
    pub fn for_route(route: impl Into<String>) -> Self {
        let mut ctx = Self::new();
        ctx.route = Some(route.into());
        ctx
    }

    /// Returns the request ID.
    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Returns the matched route template, if any.
    #[must_use]
    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    /// Returns when the request started processing.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the elapsed time since the request started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Stores a typed extension value.
    ///
    /// # Example
    ///
    /// ```
    /// use tollgate_middleware::context::MiddlewareContext;
    ///
    /// struct Remaining(u64);
    ///
    /// let mut ctx = MiddlewareContext::new();
    /// ctx.set_extension(Remaining(4));
    /// assert_eq!(ctx.get_extension::<Remaining>().unwrap().0, 4);
    /// ```
    pub fn set_extension<T: Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves a typed extension value.
    #[must_use]
    pub fn get_extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }

    /// Removes and returns a typed extension value.
    pub fn remove_extension<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast().ok())
            .map(|b| *b)
    }
}

impl Default for MiddlewareContext {
    fn default() -> Self {
        Self::new()
    }
}
