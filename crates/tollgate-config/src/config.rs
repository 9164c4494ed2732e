//! Root configuration type.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tollgate_telemetry::{LogConfig, LogFormat, MetricsConfig, TelemetryConfig};

use crate::schema::{OAuthSection, RateLimitSection, ServerSection, TelemetrySection};
use crate::ConfigError;

/// Complete Tollgate configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to layer a file and the
/// environment over these defaults.
///
/// # Example
///
/// ```
/// use tollgate_config::TollgateConfig;
///
/// let config = TollgateConfig::default();
/// assert_eq!(config.server.http_addr, "0.0.0.0:7171");
/// assert_eq!(config.rate_limit.capacity, 5);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct TollgateConfig {
    /// Server settings.
    #[serde(default)]
    pub server: ServerSection,

    /// Admission control settings.
    #[serde(default)]
    pub rate_limit: RateLimitSection,

    /// Logging and metrics settings.
    #[serde(default)]
    pub telemetry: TelemetrySection,

    /// OAuth2 settings.
    #[serde(default)]
    pub oauth: OAuthSection,
}

impl TollgateConfig {
    /// Development preset: pretty debug logs.
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.telemetry.log_level = "debug".to_string();
        config.telemetry.log_format = LogFormat::Pretty;
        config
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.http_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::invalid_value(
                "server.http_addr",
                format!("invalid socket address: {}", self.server.http_addr),
            ));
        }

        if self.server.shutdown_timeout == 0 {
            return Err(ConfigError::invalid_value(
                "server.shutdown_timeout",
                "must be greater than zero",
            ));
        }

        if self.server.request_timeout == 0 {
            return Err(ConfigError::invalid_value(
                "server.request_timeout",
                "must be greater than zero",
            ));
        }

        if self.rate_limit.capacity < 1 {
            return Err(ConfigError::invalid_value(
                "rate_limit.capacity",
                "must be at least 1",
            ));
        }

        if !self.rate_limit.refill_rate.is_finite() || self.rate_limit.refill_rate < 0.0 {
            return Err(ConfigError::invalid_value(
                "rate_limit.refill_rate",
                "must be a finite, non-negative number",
            ));
        }

        if !self.telemetry.metrics_path.starts_with('/') {
            return Err(ConfigError::invalid_value(
                "telemetry.metrics_path",
                "must start with '/'",
            ));
        }

        Ok(())
    }

    /// Returns the drain deadline.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout)
    }

    /// Returns the per-request handler timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout)
    }

    /// Builds the telemetry settings.
    ///
    /// JSON output uses the production logging preset and pretty output the
    /// development one; the configured level applies to both.
    #[must_use]
    pub fn telemetry_config(&self) -> TelemetryConfig {
        let mut logging = match self.telemetry.log_format {
            LogFormat::Json => LogConfig::production(),
            LogFormat::Pretty => LogConfig::development(),
        };
        logging.level.clone_from(&self.telemetry.log_level);

        TelemetryConfig::new(
            logging,
            MetricsConfig {
                enabled: self.telemetry.metrics_enabled,
                path: self.telemetry.metrics_path.clone(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        TollgateConfig::default().validate().unwrap();
    }

    #[test]
    fn test_zero_capacity_is_invalid() {
        let mut config = TollgateConfig::default();
        config.rate_limit.capacity = 0;

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "rate_limit.capacity"));
    }

    #[test]
    fn test_negative_refill_rate_is_invalid() {
        let mut config = TollgateConfig::default();
        config.rate_limit.refill_rate = -0.5;
        assert!(config.validate().is_err());

        config.rate_limit.refill_rate = f64::NAN;
        assert!(config.validate().is_err());

        config.rate_limit.refill_rate = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_address_is_invalid() {
        let mut config = TollgateConfig::default();
        config.server.http_addr = "localhost".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_shutdown_timeout_is_invalid() {
        let mut config = TollgateConfig::default();
        config.server.shutdown_timeout = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_metrics_path_must_be_absolute() {
        let mut config = TollgateConfig::default();
        config.telemetry.metrics_path = "metrics".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_durations() {
        let config = TollgateConfig::default();
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_telemetry_config() {
        let mut config = TollgateConfig::development();
        config.telemetry.log_level = "trace".to_string();
        config.telemetry.metrics_path = "/stats".to_string();

        let telemetry = config.telemetry_config();
        assert_eq!(telemetry.logging.format, LogFormat::Pretty);
        assert_eq!(telemetry.logging.level, "trace");
        assert_eq!(telemetry.metrics.path, "/stats");
    }
}
