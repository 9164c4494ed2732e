//! Layered configuration loading.
//!
//! Later layers override earlier ones:
//!
//! 1. Built-in defaults
//! 2. A configuration file (TOML or JSON, chosen by extension)
//! 3. `.env` and `TOLLGATE_*` environment variables

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use tollgate_telemetry::LogFormat;

use crate::{ConfigError, TollgateConfig};

/// Environment variables recognised by [`ConfigLoader::with_env`].
pub mod vars {
    /// `server.http_addr`
    pub const HTTP_ADDR: &str = "TOLLGATE_HTTP_ADDR";
    /// `server.shutdown_timeout`
    pub const SHUTDOWN_TIMEOUT: &str = "TOLLGATE_SHUTDOWN_TIMEOUT";
    /// `server.request_timeout`
    pub const REQUEST_TIMEOUT: &str = "TOLLGATE_REQUEST_TIMEOUT";
    /// `rate_limit.enabled`
    pub const RATE_LIMIT_ENABLED: &str = "TOLLGATE_RATE_LIMIT_ENABLED";
    /// `rate_limit.capacity`
    pub const RATE_LIMIT_CAPACITY: &str = "TOLLGATE_RATE_LIMIT_CAPACITY";
    /// `rate_limit.refill_rate`
    pub const RATE_LIMIT_REFILL_RATE: &str = "TOLLGATE_RATE_LIMIT_REFILL_RATE";
    /// `telemetry.log_level`
    pub const LOG_LEVEL: &str = "TOLLGATE_LOG_LEVEL";
    /// `telemetry.log_format`
    pub const LOG_FORMAT: &str = "TOLLGATE_LOG_FORMAT";
    /// `oauth.client_id`
    pub const OAUTH_CLIENT_ID: &str = "TOLLGATE_OAUTH_CLIENT_ID";
    /// `oauth.client_secret`
    pub const OAUTH_CLIENT_SECRET: &str = "TOLLGATE_OAUTH_CLIENT_SECRET";
    /// `oauth.redirect_url`
    pub const OAUTH_REDIRECT_URL: &str = "TOLLGATE_OAUTH_REDIRECT_URL";
}

/// Configuration loader.
///
/// # Example
///
/// ```no_run
/// use tollgate_config::ConfigLoader;
///
/// # fn main() -> Result<(), tollgate_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_optional_file("tollgate.toml")?
///     .with_dotenv()
///     .with_env()
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config: TollgateConfig,
    use_env: bool,
}

impl ConfigLoader {
    /// Creates a loader holding the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from the development preset instead of the defaults.
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = TollgateConfig::development();
        self
    }

    /// Loads a TOML or JSON file, chosen by extension.
    ///
    /// Fields the file omits keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is missing, unreadable, malformed,
    /// has an unknown field, or has an unsupported extension.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;

        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        self.config = parse(&content, format)?;
        Ok(self)
    }

    /// Loads a file if it exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Loads configuration from a string in the named format (`toml` or `json`).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails.
    ///
    /// # Example
    ///
    /// ```
    /// use tollgate_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string("[rate_limit]\ncapacity = 10", "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.rate_limit.capacity, 10);
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = parse(content, format)?;
        Ok(self)
    }

    /// Loads a `.env` file into the process environment, if one exists.
    #[must_use]
    pub fn with_dotenv(self) -> Self {
        // A missing .env file is the common case.
        let _ = dotenvy::dotenv();
        self
    }

    /// Applies `TOLLGATE_*` environment overrides when loading.
    #[must_use]
    pub fn with_env(mut self) -> Self {
        self.use_env = true;
        self
    }

    /// Applies environment overrides (if enabled) and validates.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an environment variable does not parse or
    /// validation fails.
    pub fn load(mut self) -> Result<TollgateConfig, ConfigError> {
        if self.use_env {
            self.apply_overrides(|name| env::var(name).ok())?;
        }

        self.config.validate()?;
        Ok(self.config)
    }

    /// Returns the configuration without environment overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> TollgateConfig {
        self.config
    }

    /// Applies overrides from `lookup`, which maps a variable name to its value.
    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = &mut self.config;

        if let Some(value) = lookup(vars::HTTP_ADDR) {
            config.server.http_addr = value;
        }
        if let Some(value) = lookup(vars::SHUTDOWN_TIMEOUT) {
            config.server.shutdown_timeout =
                parse_env(vars::SHUTDOWN_TIMEOUT, &value, "expected whole seconds")?;
        }
        if let Some(value) = lookup(vars::REQUEST_TIMEOUT) {
            config.server.request_timeout =
                parse_env(vars::REQUEST_TIMEOUT, &value, "expected whole seconds")?;
        }

        if let Some(value) = lookup(vars::RATE_LIMIT_ENABLED) {
            config.rate_limit.enabled = parse_bool(&value)
                .ok_or_else(|| ConfigError::env_var(vars::RATE_LIMIT_ENABLED, "expected boolean"))?;
        }
        if let Some(value) = lookup(vars::RATE_LIMIT_CAPACITY) {
            config.rate_limit.capacity =
                parse_env(vars::RATE_LIMIT_CAPACITY, &value, "expected integer")?;
        }
        if let Some(value) = lookup(vars::RATE_LIMIT_REFILL_RATE) {
            config.rate_limit.refill_rate =
                parse_env(vars::RATE_LIMIT_REFILL_RATE, &value, "expected number")?;
        }

        if let Some(value) = lookup(vars::LOG_LEVEL) {
            config.telemetry.log_level = value;
        }
        if let Some(value) = lookup(vars::LOG_FORMAT) {
            config.telemetry.log_format = LogFormat::from_str(&value)
                .map_err(|_| ConfigError::env_var(vars::LOG_FORMAT, "expected 'json' or 'pretty'"))?;
        }

        if let Some(value) = lookup(vars::OAUTH_CLIENT_ID) {
            config.oauth.client_id = value;
        }
        if let Some(value) = lookup(vars::OAUTH_CLIENT_SECRET) {
            config.oauth.client_secret = value;
        }
        if let Some(value) = lookup(vars::OAUTH_REDIRECT_URL) {
            config.oauth.redirect_url = value;
        }

        Ok(())
    }
}

fn parse(content: &str, format: &str) -> Result<TollgateConfig, ConfigError> {
    match format.to_ascii_lowercase().as_str() {
        "toml" => Ok(toml::from_str(content)?),
        "json" => Ok(serde_json::from_str(content)?),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}

fn parse_env<T: FromStr>(var: &str, value: &str, expected: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env_var(var, format!("{expected}, got '{value}'")))
}

/// Parses a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
