//! Token-bucket rate limiting.
//!
//! A single process-wide [`TokenBucket`] gates request admission. Each check
//! refills the bucket by `elapsed * refill_rate` (capped at `capacity`) and
//! then spends one token if at least one is available. Rejection never
//! deducts, and fractional tokens carry over between checks so a slow trickle
//! of traffic is eventually admitted.
//!
//! The check never waits: backpressure is expressed as a `429 Too Many
//! Requests` response, not as delay.
//!
//! # Example
//!
//! ```
//! use tollgate_middleware::stages::rate_limit::TokenBucket;
//!
//! let bucket = TokenBucket::new(5, 1.0).unwrap();
//! for _ in 0..5 {
//!     assert!(bucket.try_admit());
//! }
//! assert!(!bucket.try_admit());
//! ```

use std::sync::Arc;
use std::time::Duration;

use http::{HeaderValue, StatusCode};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response, ResponseExt};

/// Rate limit header names.
pub mod headers {
    /// Bucket capacity.
    pub const LIMIT: &str = "x-ratelimit-limit";
    /// Whole tokens left after this request was admitted.
    pub const REMAINING: &str = "x-ratelimit-remaining";
    /// Seconds to wait before retrying (on 429).
    pub const RETRY_AFTER: &str = "retry-after";
}

/// Errors raised when building a token bucket.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RateLimitError {
    /// Capacity below one token.
    #[error("rate limit capacity must be at least 1, got {0}")]
    InvalidCapacity(u64),

    /// Negative, NaN, or infinite refill rate.
    #[error("rate limit refill rate must be finite and non-negative, got {0}")]
    InvalidRefillRate(f64),
}

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    /// The request may proceed.
    Admitted {
        /// Whole tokens left in the bucket.
        remaining: u64,
    },
    /// The request is rejected.
    Rejected {
        /// Time until one token is available, `None` if the bucket never refills.
        retry_after: Option<Duration>,
    },
}

impl Admission {
    /// Returns `true` for [`Admission::Admitted`].
    #[must_use]
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket shared by every request.
///
/// The bucket starts full. All state lives behind one mutex, so each check is
/// a single refill-then-spend critical section and no two callers can spend
/// the same token.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u64,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Creates a full bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if `capacity < 1` or `refill_rate` is negative or not
    /// finite.
    pub fn new(capacity: u64, refill_rate: f64) -> Result<Self, RateLimitError> {
        if capacity < 1 {
            return Err(RateLimitError::InvalidCapacity(capacity));
        }
        if !refill_rate.is_finite() || refill_rate < 0.0 {
            return Err(RateLimitError::InvalidRefillRate(refill_rate));
        }

        Ok(Self {
            capacity,
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        })
    }

    /// Returns the maximum burst size.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Returns the sustained admit rate in tokens per second.
    #[must_use]
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Attempts to admit one request now.
    pub fn try_admit(&self) -> bool {
        self.check_at(Instant::now()).is_admitted()
    }

    /// Attempts to admit one request now, reporting the details.
    pub fn check(&self) -> Admission {
        self.check_at(Instant::now())
    }

    /// Attempts to admit one request at `now`.
    ///
    /// An instant earlier than the last refill counts as zero elapsed time.
    pub fn check_at(&self, now: Instant) -> Admission {
        let mut state = self.state.lock();

        let elapsed = now.saturating_duration_since(state.last_refill);
        let capacity = self.capacity as f64;
        state.tokens = elapsed
            .as_secs_f64()
            .mul_add(self.refill_rate, state.tokens)
            .min(capacity);
        state.last_refill = state.last_refill.max(now);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Admission::Admitted {
                remaining: state.tokens.floor() as u64,
            }
        } else {
            // A wait too long for a Duration is reported like a zero rate.
            let retry_after = (self.refill_rate > 0.0)
                .then(|| (1.0 - state.tokens) / self.refill_rate)
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
            Admission::Rejected { retry_after }
        }
    }
}

/// Rate limiting middleware.
///
/// Admitted requests continue down the chain and get `x-ratelimit-limit` and
/// `x-ratelimit-remaining` headers on their response. Rejected requests are
/// answered here with `429 Too Many Requests` and a `retry-after` header; the
/// handler never runs.
#[derive(Debug, Clone)]
pub struct RateLimitMiddleware {
    bucket: Arc<TokenBucket>,
    error_message: String,
}

impl RateLimitMiddleware {
    /// Default message returned when a request is rejected.
    pub const DEFAULT_MESSAGE: &'static str = "Rate limit exceeded";

    /// Creates the middleware around a shared bucket.
    #[must_use]
    pub fn new(bucket: Arc<TokenBucket>) -> Self {
        Self {
            bucket,
            error_message: Self::DEFAULT_MESSAGE.to_string(),
        }
    }

    /// Creates a rate limit builder.
    #[must_use]
    pub fn builder() -> RateLimitBuilder {
        RateLimitBuilder::new()
    }

    /// Returns the shared bucket.
    #[must_use]
    pub fn bucket(&self) -> &Arc<TokenBucket> {
        &self.bucket
    }

    /// Returns the rejection message.
    #[must_use]
    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    /// Builds a 429 Too Many Requests response.
    fn build_rejection(&self, retry_after: Option<Duration>) -> Response {
        let mut response = Response::json_error(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            &self.error_message,
        );

        let map = response.headers_mut();
        map.insert(headers::LIMIT, HeaderValue::from(self.bucket.capacity()));
        map.insert(headers::REMAINING, HeaderValue::from(0u64));
        if let Some(wait) = retry_after {
            let secs = wait.as_secs_f64().ceil().max(1.0) as u64;
            map.insert(headers::RETRY_AFTER, HeaderValue::from(secs));
        }

        response
    }

    /// Adds rate limit headers to an admitted response.
    fn add_rate_limit_headers(&self, mut response: Response, remaining: u64) -> Response {
        let map = response.headers_mut();
        map.insert(headers::LIMIT, HeaderValue::from(self.bucket.capacity()));
        map.insert(headers::REMAINING, HeaderValue::from(remaining));
        response
    }
}

impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate-limit"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            match self.bucket.check() {
                Admission::Admitted { remaining } => {
                    ctx.set_extension(Admission::Admitted { remaining });
                    let response = next.run(ctx, request).await;
                    self.add_rate_limit_headers(response, remaining)
                }
                rejected @ Admission::Rejected { retry_after } => {
                    tracing::debug!(
                        request_id = %ctx.request_id(),
                        http.method = %request.method(),
                        http.path = ctx.route().unwrap_or(""),
                        "Request rejected by rate limiter"
                    );
                    ctx.set_extension(rejected);
                    self.build_rejection(retry_after)
                }
            }
        })
    }
}

/// Builder for [`RateLimitMiddleware`].
#[derive(Debug, Clone)]
pub struct RateLimitBuilder {
    capacity: u64,
    refill_rate: f64,
    error_message: String,
}

impl Default for RateLimitBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitBuilder {
    /// Creates a builder with a burst of 5 and one token per second.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capacity: 5,
            refill_rate: 1.0,
            error_message: RateLimitMiddleware::DEFAULT_MESSAGE.to_string(),
        }
    }

    /// Sets the maximum burst size.
    #[must_use]
    pub fn capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the sustained admit rate in tokens per second.
    #[must_use]
    pub fn refill_rate(mut self, refill_rate: f64) -> Self {
        self.refill_rate = refill_rate;
        self
    }

    /// Sets the message returned when a request is rejected.
    #[must_use]
    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = message.into();
        self
    }

    /// Builds the middleware and its bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket parameters are invalid.
    pub fn build(self) -> Result<RateLimitMiddleware, RateLimitError> {
        let bucket = TokenBucket::new(self.capacity, self.refill_rate)?;
        Ok(RateLimitMiddleware {
            bucket: Arc::new(bucket),
            error_message: self.error_message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{Method, Request as HttpRequest};
    use http_body_util::{BodyExt, Full};
    use proptest::prelude::*;

    fn request() -> Request {
        HttpRequest::builder()
            .method(Method::GET)
            .uri("/users")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    fn ok_handler<'a>() -> Next<'a> {
        Next::handler(|_ctx, _req| {
            Box::pin(async {
                http::Response::builder()
                    .status(StatusCode::OK)
                    .body(Full::new(Bytes::from("OK")))
                    .unwrap()
            })
        })
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert_eq!(
            TokenBucket::new(0, 1.0).unwrap_err(),
            RateLimitError::InvalidCapacity(0)
        );
    }

    #[test]
    fn test_invalid_refill_rate_is_rejected() {
        assert!(TokenBucket::new(1, -1.0).is_err());
        assert!(TokenBucket::new(1, f64::NAN).is_err());
        assert!(TokenBucket::new(1, f64::INFINITY).is_err());
        assert!(TokenBucket::new(1, 0.0).is_ok());
    }

    #[test]
    fn test_burst_then_reject() {
        let bucket = TokenBucket::new(5, 1.0).unwrap();
        let start = Instant::now();

        for _ in 0..5 {
            assert!(bucket.check_at(start).is_admitted());
        }
        assert!(!bucket.check_at(start).is_admitted());

        let later = start + Duration::from_secs(1);
        assert!(bucket.check_at(later).is_admitted());
        assert!(!bucket.check_at(later).is_admitted());
    }

    #[test]
    fn test_rejection_does_not_deduct() {
        let bucket = TokenBucket::new(1, 1.0).unwrap();
        let start = Instant::now();

        assert!(bucket.check_at(start).is_admitted());
        for _ in 0..10 {
            assert!(!bucket.check_at(start).is_admitted());
        }
        assert!(bucket
            .check_at(start + Duration::from_secs(1))
            .is_admitted());
    }

    #[test]
    fn test_fractional_tokens_accumulate() {
        let bucket = TokenBucket::new(1, 1.0).unwrap();
        let start = Instant::now();
        assert!(bucket.check_at(start).is_admitted());

        // Three checks 400ms apart: 0.4, 0.8, then 1.2 tokens.
        assert!(!bucket
            .check_at(start + Duration::from_millis(400))
            .is_admitted());
        assert!(!bucket
            .check_at(start + Duration::from_millis(800))
            .is_admitted());
        assert!(bucket
            .check_at(start + Duration::from_millis(1200))
            .is_admitted());
    }

    #[test]
    fn test_tokens_capped_at_capacity() {
        let bucket = TokenBucket::new(3, 10.0).unwrap();
        let later = Instant::now() + Duration::from_secs(3600);

        let admitted = (0..10).filter(|_| bucket.check_at(later).is_admitted()).count();
        assert_eq!(admitted, 3);
    }

    #[test]
    fn test_zero_rate_never_refills() {
        let bucket = TokenBucket::new(1, 0.0).unwrap();
        let start = Instant::now();
        assert!(bucket.check_at(start).is_admitted());

        let rejected = bucket.check_at(start + Duration::from_secs(3600));
        assert_eq!(rejected, Admission::Rejected { retry_after: None });
    }

    #[test]
    fn test_tiny_rate_rejects_without_retry_after() {
        let bucket = TokenBucket::new(1, 1e-30).unwrap();
        let start = Instant::now();
        assert!(bucket.try_admit());
        assert!(!bucket.try_admit());

        let rejected = bucket.check_at(start + Duration::from_secs(60));
        assert_eq!(rejected, Admission::Rejected { retry_after: None });
    }

    #[test]
    fn test_retry_after_reports_time_to_next_token() {
        let bucket = TokenBucket::new(1, 2.0).unwrap();
        let start = Instant::now();
        assert!(bucket.check_at(start).is_admitted());

        match bucket.check_at(start) {
            Admission::Rejected {
                retry_after: Some(wait),
            } => assert_eq!(wait, Duration::from_millis(500)),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_remaining_counts_whole_tokens() {
        let bucket = TokenBucket::new(5, 1.0).unwrap();
        let start = Instant::now();
        assert_eq!(bucket.check_at(start), Admission::Admitted { remaining: 4 });
        assert_eq!(bucket.check_at(start), Admission::Admitted { remaining: 3 });
    }

    #[test]
    fn test_earlier_instant_counts_as_no_time() {
        let bucket = TokenBucket::new(1, 1.0).unwrap();
        let start = Instant::now() + Duration::from_secs(10);
        assert!(bucket.check_at(start).is_admitted());
        assert!(!bucket
            .check_at(start - Duration::from_secs(5))
            .is_admitted());
    }

    #[test]
    fn test_concurrent_checks_never_double_spend() {
        let bucket = Arc::new(TokenBucket::new(100, 0.0).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let bucket = Arc::clone(&bucket);
                std::thread::spawn(move || (0..50).filter(|_| bucket.try_admit()).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_clock_refill() {
        let bucket = TokenBucket::new(5, 1.0).unwrap();
        for _ in 0..5 {
            assert!(bucket.try_admit());
        }
        assert!(!bucket.try_admit());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(bucket.try_admit());
        assert!(!bucket.try_admit());
    }

    #[test]
    fn test_builder_defaults() {
        let middleware = RateLimitMiddleware::builder().build().unwrap();
        assert_eq!(middleware.bucket().capacity(), 5);
        assert!((middleware.bucket().refill_rate() - 1.0).abs() < f64::EPSILON);
        assert_eq!(middleware.error_message(), "Rate limit exceeded");
    }

    #[test]
    fn test_builder_rejects_zero_capacity() {
        let result = RateLimitMiddleware::builder().capacity(0).build();
        assert!(matches!(result, Err(RateLimitError::InvalidCapacity(0))));
    }

    #[tokio::test]
    async fn test_middleware_admits_and_annotates() {
        let middleware = RateLimitMiddleware::builder()
            .capacity(2)
            .refill_rate(0.0)
            .build()
            .unwrap();
        let mut ctx = MiddlewareContext::for_route("/users");

        let response = middleware.process(&mut ctx, request(), ok_handler()).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(headers::LIMIT).unwrap(), "2");
        assert_eq!(response.headers().get(headers::REMAINING).unwrap(), "1");
        assert!(ctx.get_extension::<Admission>().unwrap().is_admitted());
    }

    #[tokio::test]
    async fn test_middleware_short_circuits_when_empty() {
        let middleware = RateLimitMiddleware::builder()
            .capacity(1)
            .refill_rate(0.5)
            .error_message("Slow down")
            .build()
            .unwrap();

        let mut ctx = MiddlewareContext::for_route("/users");
        let first = middleware.process(&mut ctx, request(), ok_handler()).await;
        assert_eq!(first.status(), StatusCode::OK);

        let handler_ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&handler_ran);
        let next = Next::handler(move |_ctx, _req| {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
            Box::pin(async { http::Response::new(Full::new(Bytes::new())) })
        });

        let mut ctx = MiddlewareContext::for_route("/users");
        let response = middleware.process(&mut ctx, request(), next).await;

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(!handler_ran.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(response.headers().get(headers::RETRY_AFTER).unwrap(), "2");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "RATE_LIMITED");
        assert_eq!(json["error"]["message"], "Slow down");
    }

    #[test]
    fn test_middleware_name() {
        let middleware = RateLimitMiddleware::builder().build().unwrap();
        assert_eq!(middleware.name(), "rate-limit");
    }

    proptest! {
        /// Admissions inside any window [t_i, t_j] never exceed
        /// `capacity + refill_rate * (t_j - t_i)`.
        #[test]
        fn prop_window_bound(
            capacity in 1u64..10,
            rate_milli in 0u64..5_000,
            gaps_ms in proptest::collection::vec(0u64..1_500, 1..80),
        ) {
            let refill_rate = rate_milli as f64 / 1000.0;
            let bucket = TokenBucket::new(capacity, refill_rate).unwrap();
            let start = Instant::now();

            let mut at_ms = 0u64;
            let mut admitted_at = Vec::new();
            for gap in gaps_ms {
                at_ms += gap;
                if bucket.check_at(start + Duration::from_millis(at_ms)).is_admitted() {
                    admitted_at.push(at_ms);
                }
            }

            for i in 0..admitted_at.len() {
                for j in i..admitted_at.len() {
                    let window_secs = (admitted_at[j] - admitted_at[i]) as f64 / 1000.0;
                    let count = (j - i + 1) as f64;
                    let bound = refill_rate.mul_add(window_secs, capacity as f64);
                    prop_assert!(count <= bound + 1e-6, "{count} admissions exceed bound {bound}");
                }
            }
        }
    }
}
