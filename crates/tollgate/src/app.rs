//! Route wiring and server assembly.

use std::sync::Arc;

use http::{Method, StatusCode, Uri};
use reqwest::Url;
use tollgate_config::TollgateConfig;
use tollgate_middleware::{MetricsMiddleware, Pipeline, RateLimitError, RateLimitMiddleware};
use tollgate_server::handler::{handler_fn, json, text};
use tollgate_server::{Router, Server, ServerConfig};
use tollgate_telemetry::{MetricsRecorder, PrometheusHandle};

use crate::oauth::{OAuthClient, OAuthError};
use crate::users::{self, UserStore};

/// Errors assembling the application.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The OAuth settings are unusable.
    #[error(transparent)]
    OAuth(#[from] OAuthError),

    /// The rate-limit settings are unusable.
    #[error("invalid rate limit: {0}")]
    RateLimit(#[from] RateLimitError),
}

/// State shared by the handlers.
#[derive(Clone)]
pub struct AppState {
    /// User records.
    pub users: Arc<UserStore>,
    /// OAuth client for `/login` and `/callback`.
    pub oauth: Arc<OAuthClient>,
    /// Per-route request counters.
    pub recorder: Arc<MetricsRecorder>,
    /// Process-level metrics, when a Prometheus recorder is installed.
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    /// Creates empty state for `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::OAuth`] if the OAuth URLs are invalid.
    pub fn new(
        config: &TollgateConfig,
        prometheus: Option<PrometheusHandle>,
    ) -> Result<Self, AppError> {
        Ok(Self {
            users: Arc::new(UserStore::new()),
            oauth: Arc::new(OAuthClient::new(config.oauth.clone())?),
            recorder: Arc::new(MetricsRecorder::new()),
            prometheus,
        })
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("users", &self.users.len())
            .field("oauth", &self.oauth)
            .field("prometheus", &self.prometheus.is_some())
            .finish_non_exhaustive()
    }
}

/// Builds the route table.
///
/// The metrics endpoint is only mounted when metrics are enabled.
pub fn router(state: &AppState, config: &TollgateConfig) -> Router {
    let mut router = Router::new()
        .route(
            Method::GET,
            "/",
            handler_fn(|_req| async {
                json(StatusCode::OK, &serde_json::json!({ "message": "Welcome to Tollgate" }))
            }),
        )
        .route(
            Method::GET,
            "/health",
            handler_fn(|_req| async {
                json(StatusCode::OK, &serde_json::json!({ "status": "OK" }))
            }),
        );

    let store = Arc::clone(&state.users);
    router.add_route(
        Method::GET,
        "/users",
        handler_fn(move |req| users::list(Arc::clone(&store), req)),
    );
    let store = Arc::clone(&state.users);
    router.add_route(
        Method::POST,
        "/create",
        handler_fn(move |req| users::create(Arc::clone(&store), req)),
    );
    let store = Arc::clone(&state.users);
    router.add_route(
        Method::PUT,
        "/update",
        handler_fn(move |req| users::update(Arc::clone(&store), req)),
    );
    let store = Arc::clone(&state.users);
    router.add_route(
        Method::DELETE,
        "/delete",
        handler_fn(move |req| users::delete(Arc::clone(&store), req)),
    );

    let oauth = Arc::clone(&state.oauth);
    router.add_route(
        Method::GET,
        "/login",
        handler_fn(move |req| {
            let oauth = Arc::clone(&oauth);
            async move { oauth.login(req).await }
        }),
    );
    let oauth = Arc::clone(&state.oauth);
    router.add_route(
        Method::GET,
        "/callback",
        handler_fn(move |req| {
            let oauth = Arc::clone(&oauth);
            async move { oauth.callback(req).await }
        }),
    );

    if config.telemetry.metrics_enabled {
        let recorder = Arc::clone(&state.recorder);
        let prometheus = state.prometheus.clone();
        router.add_route(
            Method::GET,
            &config.telemetry.metrics_path,
            handler_fn(move |_req| {
                let mut body = recorder.render();
                if let Some(handle) = &prometheus {
                    body.push_str(&handle.render());
                }
                async move { text(StatusCode::OK, body) }
            }),
        );
    }

    router
}

/// Builds the admission pipeline: metrics, then the rate limit if enabled.
///
/// # Errors
///
/// Returns [`AppError::RateLimit`] for a capacity below one or an invalid
/// refill rate.
pub fn pipeline(state: &AppState, config: &TollgateConfig) -> Result<Pipeline, AppError> {
    let rate_limit = if config.rate_limit.enabled {
        Some(
            RateLimitMiddleware::builder()
                .capacity(config.rate_limit.capacity)
                .refill_rate(config.rate_limit.refill_rate)
                .build()?,
        )
    } else {
        None
    };

    Ok(Pipeline::standard(
        MetricsMiddleware::new(Arc::clone(&state.recorder)),
        rate_limit,
    ))
}

/// Assembles the server for `config` around `state`.
///
/// # Errors
///
/// Returns [`AppError`] if the pipeline cannot be built.
pub fn build_server(config: &TollgateConfig, state: &AppState) -> Result<Server, AppError> {
    let server_config = ServerConfig::builder()
        .http_addr(config.server.http_addr.clone())
        .shutdown_timeout(config.shutdown_timeout())
        .request_timeout(config.request_timeout())
        .build();

    Ok(Server::builder()
        .config(server_config)
        .router(router(state, config))
        .pipeline(pipeline(state, config)?)
        .build())
}

/// Returns the first value of query parameter `name`, percent-decoded.
pub(crate) fn query_param(uri: &Uri, name: &str) -> Option<String> {
    let query = uri.query()?;
    let url = Url::parse(&format!("http://localhost/?{query}")).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}
