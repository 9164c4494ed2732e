//! Type-erased request handlers.
//!
//! A handler receives the buffered request and produces a response. It never
//! fails: errors are expressed as error responses.
//!
//! # Example
//!
//! ```rust
//! use tollgate_server::handler::{handler_fn, json};
//! use http::StatusCode;
//!
//! let health = handler_fn(|_req| async {
//!     json(StatusCode::OK, &serde_json::json!({ "status": "OK" }))
//! });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::Full;
use serde_json::Value;
use tollgate_middleware::{BoxFuture, Request, Response, ResponseExt};

/// A shareable, type-erased handler.
pub type BoxedHandler = Arc<dyn Fn(Request) -> BoxFuture<'static, Response> + Send + Sync>;

/// Wraps an async function as a [`BoxedHandler`].
pub fn handler_fn<F, Fut>(f: F) -> BoxedHandler
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(move |request| Box::pin(f(request)))
}

/// Path parameters captured by the router, stored in the request extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(pub HashMap<String, String>);

impl PathParams {
    /// Returns a parameter by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

/// Creates a JSON response.
pub fn json(status: StatusCode, value: &Value) -> Response {
    Response::json(status, value)
}

/// Creates the JSON error envelope `{"error":{"code":..,"message":..}}`.
pub fn json_error(status: StatusCode, code: &str, message: &str) -> Response {
    Response::json_error(status, code, message)
}

/// Creates a plain-text response.
pub fn text(status: StatusCode, body: impl Into<String>) -> Response {
    let mut response = http::Response::new(Full::new(Bytes::from(body.into())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Response for a request that matched no route.
pub fn not_found(path: &str) -> Response {
    json_error(
        StatusCode::NOT_FOUND,
        "NOT_FOUND",
        &format!("No route for {path}"),
    )
}
