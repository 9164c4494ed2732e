//! Request routing.
//!
//! Routes map a method and a path template to a handler. Matching returns the
//! template itself, which is what request metrics are keyed on.
//!
//! # Example
//!
//! ```rust
//! use tollgate_server::handler::{handler_fn, text};
//! use tollgate_server::Router;
//! use http::{Method, StatusCode};
//!
//! let router = Router::new()
//!     .route(Method::GET, "/users/{id}", handler_fn(|_req| async {
//!         text(StatusCode::OK, "user")
//!     }));
//!
//! let matched = router.match_route(&Method::GET, "/users/42").unwrap();
//! assert_eq!(matched.template(), "/users/{id}");
//! assert_eq!(matched.params().get("id"), Some("42"));
//! ```

use std::collections::HashMap;
use std::fmt;

use http::Method;

use crate::handler::{BoxedHandler, PathParams};

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Literal(String),
    Param(String),
}

#[derive(Clone)]
struct Route {
    method: Method,
    template: String,
    segments: Vec<PathSegment>,
    handler: BoxedHandler,
}

impl Route {
    fn new(method: Method, template: &str, handler: BoxedHandler) -> Self {
        Self {
            method,
            template: template.to_string(),
            segments: parse_segments(template),
            handler,
        }
    }

    fn match_path(&self, path: &str) -> Option<PathParams> {
        let actual: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if actual.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, value) in self.segments.iter().zip(actual) {
            match segment {
                PathSegment::Literal(expected) if expected != value => return None,
                PathSegment::Literal(_) => {}
                PathSegment::Param(name) => {
                    params.insert(name.clone(), value.to_string());
                }
            }
        }
        Some(PathParams(params))
    }
}

fn parse_segments(template: &str) -> Vec<PathSegment> {
    template
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| match s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(name) => PathSegment::Param(name.to_string()),
            None => PathSegment::Literal(s.to_string()),
        })
        .collect()
}

/// A matched route.
#[derive(Clone)]
pub struct RouteMatch {
    template: String,
    params: PathParams,
    handler: BoxedHandler,
}

impl RouteMatch {
    /// Returns the matched route template.
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Returns the captured path parameters.
    #[must_use]
    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// Returns the route's handler.
    #[must_use]
    pub fn handler(&self) -> &BoxedHandler {
        &self.handler
    }

    /// Splits the match into its parameters and handler.
    #[must_use]
    pub fn into_parts(self) -> (PathParams, BoxedHandler) {
        (self.params, self.handler)
    }
}

impl fmt::Debug for RouteMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteMatch")
            .field("template", &self.template)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Method and path router. Routes are tried in registration order.
#[derive(Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a route, builder style.
    #[must_use]
    pub fn route(mut self, method: Method, template: &str, handler: BoxedHandler) -> Self {
        self.add_route(method, template, handler);
        self
    }

    /// Adds a route.
    pub fn add_route(&mut self, method: Method, template: &str, handler: BoxedHandler) {
        self.routes.push(Route::new(method, template, handler));
    }

    /// Returns the number of registered routes.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Returns every registered `(method, template)` pair in order.
    #[must_use]
    pub fn routes(&self) -> Vec<(Method, &str)> {
        self.routes
            .iter()
            .map(|r| (r.method.clone(), r.template.as_str()))
            .collect()
    }

    /// Finds the first route matching `method` and `path`.
    ///
    /// A path that matches only under a different method is not a match.
    #[must_use]
    pub fn match_route(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        self.routes
            .iter()
            .filter(|route| route.method == *method)
            .find_map(|route| {
                route.match_path(path).map(|params| RouteMatch {
                    template: route.template.clone(),
                    params,
                    handler: route.handler.clone(),
                })
            })
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes())
            .finish()
    }
}
