//! Request counting stage.
//!
//! Counts every request it sees, keyed on the matched route template and the
//! HTTP method, before passing the request on. It runs ahead of the rate
//! limiter, so the counters reflect offered load rather than admitted load.

use std::sync::Arc;

use tollgate_telemetry::MetricsRecorder;

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};

/// Middleware that increments the per-route request counter.
///
/// Requests that matched no route are counted under the empty path.
#[derive(Debug, Clone)]
pub struct MetricsMiddleware {
    recorder: Arc<MetricsRecorder>,
}

impl MetricsMiddleware {
    /// Creates the stage around a shared recorder.
    #[must_use]
    pub fn new(recorder: Arc<MetricsRecorder>) -> Self {
        Self { recorder }
    }

    /// Returns the shared recorder.
    #[must_use]
    pub fn recorder(&self) -> &Arc<MetricsRecorder> {
        &self.recorder
    }
}

impl Middleware for MetricsMiddleware {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            self.recorder
                .record_request(ctx.route().unwrap_or(""), request.method().as_str());
            next.run(ctx, request).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{Method, Request as HttpRequest, StatusCode};
    use http_body_util::Full;

    fn request(method: Method) -> Request {
        HttpRequest::builder()
            .method(method)
            .uri("/users?page=2")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    fn ok_handler<'a>() -> Next<'a> {
        Next::handler(|_ctx, _req| {
            Box::pin(async { http::Response::new(Full::new(Bytes::from("OK"))) })
        })
    }

    #[tokio::test]
    async fn test_counts_by_route_and_method() {
        let recorder = Arc::new(MetricsRecorder::new());
        let middleware = MetricsMiddleware::new(Arc::clone(&recorder));

        for method in [Method::GET, Method::GET, Method::POST] {
            let mut ctx = MiddlewareContext::for_route("/users");
            let response = middleware
                .process(&mut ctx, request(method), ok_handler())
                .await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.get("/users", "GET"), 2);
        assert_eq!(snapshot.get("/users", "POST"), 1);
        assert_eq!(snapshot.get("/users?page=2", "GET"), 0);
    }

    #[tokio::test]
    async fn test_unmatched_route_counts_under_empty_path() {
        let recorder = Arc::new(MetricsRecorder::new());
        let middleware = MetricsMiddleware::new(Arc::clone(&recorder));

        let mut ctx = MiddlewareContext::new();
        middleware
            .process(&mut ctx, request(Method::GET), ok_handler())
            .await;

        assert_eq!(recorder.snapshot().get("", "GET"), 1);
    }

    #[test]
    fn test_name() {
        let middleware = MetricsMiddleware::new(Arc::new(MetricsRecorder::new()));
        assert_eq!(middleware.name(), "metrics");
    }
}
