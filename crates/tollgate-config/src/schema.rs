//! Configuration sections.

use serde::{Deserialize, Serialize};
use tollgate_telemetry::LogFormat;

/// Server section.
///
/// Timeouts are whole seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    /// HTTP bind address.
    #[serde(default = "default_http_addr")]
    pub http_addr: String,

    /// Drain deadline after a shutdown signal, in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    /// Per-request handler timeout, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            shutdown_timeout: default_shutdown_timeout(),
            request_timeout: default_request_timeout(),
        }
    }
}

fn default_http_addr() -> String {
    "0.0.0.0:7171".to_string()
}

fn default_shutdown_timeout() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    30
}

/// Rate limit section: a burst of `capacity` requests, refilled at
/// `refill_rate` tokens per second.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RateLimitSection {
    /// Whether admission control is applied.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bucket size.
    #[serde(default = "default_capacity")]
    pub capacity: u64,

    /// Tokens added per second.
    #[serde(default = "default_refill_rate")]
    pub refill_rate: f64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: default_capacity(),
            refill_rate: default_refill_rate(),
        }
    }
}

fn default_capacity() -> u64 {
    5
}

fn default_refill_rate() -> f64 {
    1.0
}

/// Logging and metrics section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TelemetrySection {
    /// Log level or `EnvFilter` directive.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,

    /// Whether the metrics endpoint is served.
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Path of the metrics endpoint.
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            metrics_enabled: true,
            metrics_path: default_metrics_path(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

/// OAuth2 authorization-code settings.
///
/// Defaults point at Google's endpoints with an empty client; credentials
/// come from the file or the environment.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct OAuthSection {
    /// OAuth client ID.
    #[serde(default)]
    pub client_id: String,

    /// OAuth client secret.
    #[serde(default)]
    pub client_secret: String,

    /// Where the provider sends the user back.
    #[serde(default = "default_redirect_url")]
    pub redirect_url: String,

    /// Provider authorization endpoint.
    #[serde(default = "default_auth_url")]
    pub auth_url: String,

    /// Provider token endpoint.
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// Requested scopes.
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

impl Default for OAuthSection {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_url: default_redirect_url(),
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            scopes: default_scopes(),
        }
    }
}

impl std::fmt::Debug for OAuthSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthSection")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_url", &self.redirect_url)
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("scopes", &self.scopes)
            .finish()
    }
}

fn default_redirect_url() -> String {
    "http://localhost:7171/callback".to_string()
}

fn default_auth_url() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_scopes() -> Vec<String> {
    vec!["https://www.googleapis.com/auth/userinfo.profile".to_string()]
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let server = ServerSection::default();
        assert_eq!(server.http_addr, "0.0.0.0:7171");
        assert_eq!(server.shutdown_timeout, 5);
        assert_eq!(server.request_timeout, 30);
    }

    #[test]
    fn test_rate_limit_defaults() {
        let rate_limit = RateLimitSection::default();
        assert!(rate_limit.enabled);
        assert_eq!(rate_limit.capacity, 5);
        assert!((rate_limit.refill_rate - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_section_keeps_field_defaults() {
        let section: RateLimitSection = toml::from_str("capacity = 10").unwrap();
        assert_eq!(section.capacity, 10);
        assert!(section.enabled);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<ServerSection, _> = toml::from_str("port = 80");
        assert!(result.is_err());
    }

    #[test]
    fn test_oauth_debug_redacts_secret() {
        let oauth = OAuthSection {
            client_secret: "hunter2".to_string(),
            ..OAuthSection::default()
        };
        assert!(!format!("{oauth:?}").contains("hunter2"));
    }
}
