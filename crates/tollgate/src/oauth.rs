//! OAuth2 authorization-code login stub.
//!
//! `/login` redirects to the provider. `/callback` exchanges the returned
//! code for a token and hands the token back as JSON. Nothing is stored.

use std::time::Duration;

use http::StatusCode;
use reqwest::Url;
use serde_json::Value;
use tollgate_config::OAuthSection;
use tollgate_middleware::{Request, Response};
use tollgate_server::handler::{json, json_error, text};
use uuid::Uuid;

use crate::app::query_param;

/// Timeout for the token exchange request.
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

/// OAuth errors.
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    /// A configured URL does not parse.
    #[error("invalid {field} '{url}': {reason}")]
    InvalidUrl {
        /// Configuration field.
        field: &'static str,
        /// Configured value.
        url: String,
        /// Parse failure.
        reason: String,
    },

    /// The token request failed or the provider rejected it.
    #[error("token exchange failed: {0}")]
    Exchange(#[from] reqwest::Error),
}

/// OAuth2 client for the login and callback routes.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    settings: OAuthSection,
    http: reqwest::Client,
}

impl OAuthClient {
    /// Creates a client, checking the configured URLs.
    ///
    /// # Errors
    ///
    /// Returns [`OAuthError::InvalidUrl`] if the authorization or token URL
    /// does not parse.
    pub fn new(settings: OAuthSection) -> Result<Self, OAuthError> {
        parse_url("oauth.auth_url", &settings.auth_url)?;
        parse_url("oauth.token_url", &settings.token_url)?;

        let http = reqwest::Client::builder()
            .timeout(EXCHANGE_TIMEOUT)
            .build()?;

        Ok(Self { settings, http })
    }

    /// Returns the settings.
    #[must_use]
    pub fn settings(&self) -> &OAuthSection {
        &self.settings
    }

    /// Builds the provider authorization URL for `state`.
    ///
    /// # Errors
    ///
    /// Returns [`OAuthError::InvalidUrl`] if the authorization URL does not
    /// parse.
    pub fn authorize_url(&self, state: &str) -> Result<Url, OAuthError> {
        let scope = self.settings.scopes.join(" ");
        Url::parse_with_params(
            &self.settings.auth_url,
            &[
                ("client_id", self.settings.client_id.as_str()),
                ("redirect_uri", self.settings.redirect_url.as_str()),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("state", state),
                ("access_type", "offline"),
            ],
        )
        .map_err(|e| OAuthError::InvalidUrl {
            field: "oauth.auth_url",
            url: self.settings.auth_url.clone(),
            reason: e.to_string(),
        })
    }

    /// Exchanges an authorization code for a token.
    ///
    /// # Errors
    ///
    /// Returns [`OAuthError::Exchange`] if the request fails, the provider
    /// answers with a non-success status, or the body is not JSON.
    pub async fn exchange(&self, code: &str) -> Result<Value, OAuthError> {
        let token = self
            .http
            .post(&self.settings.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.settings.redirect_url.as_str()),
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;
        Ok(token)
    }

    /// `GET /login`: redirects to the provider.
    pub async fn login(&self, _request: Request) -> Response {
        let state = Uuid::now_v7().to_string();

        match self.authorize_url(&state) {
            Ok(url) => redirect(url.as_str()),
            Err(e) => {
                tracing::error!(error = %e, "Failed to build authorization URL");
                json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "OAUTH_MISCONFIGURED",
                    "Login is not available",
                )
            }
        }
    }

    /// `GET /callback?code=...`: exchanges the code and returns the token.
    pub async fn callback(&self, request: Request) -> Response {
        let Some(code) = query_param(request.uri(), "code").filter(|c| !c.is_empty()) else {
            return json_error(StatusCode::BAD_REQUEST, "MISSING_CODE", "No code provided");
        };

        match self.exchange(&code).await {
            Ok(token) => json(StatusCode::OK, &serde_json::json!({ "token": token })),
            Err(e) => {
                tracing::warn!(error = %e, "Token exchange failed");
                json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "TOKEN_EXCHANGE_FAILED",
                    "Failed to exchange token",
                )
            }
        }
    }
}

fn parse_url(field: &'static str, url: &str) -> Result<Url, OAuthError> {
    Url::parse(url).map_err(|e| OAuthError::InvalidUrl {
        field,
        url: url.to_string(),
        reason: e.to_string(),
    })
}

fn redirect(location: &str) -> Response {
    let mut response = text(StatusCode::FOUND, "");
    match http::HeaderValue::from_str(location) {
        Ok(value) => {
            response.headers_mut().insert(http::header::LOCATION, value);
            response
        }
        Err(_) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "OAUTH_MISCONFIGURED",
            "Login is not available",
        ),
    }
}
