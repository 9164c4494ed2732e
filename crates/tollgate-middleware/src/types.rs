//! Common types used throughout the middleware chain.

use bytes::Bytes;
use http_body_util::Full;

/// The HTTP request type used in the middleware chain.
///
/// The body is fully buffered before the chain runs.
pub type Request = http::Request<Full<Bytes>>;

/// The HTTP response type used in the middleware chain.
pub type Response = http::Response<Full<Bytes>>;

/// Extension trait for building error responses.
pub trait ResponseExt {
    /// Creates a plain-text response with the given status code.
    fn error(status: http::StatusCode, message: &str) -> Response;

    /// Creates a JSON error envelope: `{"error":{"code":..,"message":..}}`.
    fn json_error(status: http::StatusCode, code: &str, message: &str) -> Response;

    /// Creates a JSON response from a serializable value.
    fn json(status: http::StatusCode, value: &serde_json::Value) -> Response;
}

impl ResponseExt for Response {
    fn error(status: http::StatusCode, message: &str) -> Response {
        let mut response = http::Response::new(Full::new(Bytes::from(message.to_string())));
        *response.status_mut() = status;
        response.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }

    fn json_error(status: http::StatusCode, code: &str, message: &str) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": code,
                "message": message
            }
        });
        Self::json(status, &body)
    }

    fn json(status: http::StatusCode, value: &serde_json::Value) -> Response {
        let mut response = http::Response::new(Full::new(Bytes::from(value.to_string())));
        *response.status_mut() = status;
        response.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        response
    }
}
