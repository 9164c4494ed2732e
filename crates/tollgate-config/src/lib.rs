//! Layered configuration for Tollgate.
//!
//! Defaults, then a TOML or JSON file, then `.env` and `TOLLGATE_*`
//! environment variables. The result is validated before use; any
//! configuration error is fatal at startup.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! http_addr = "0.0.0.0:7171"
//! shutdown_timeout = 5
//! request_timeout = 30
//!
//! [rate_limit]
//! enabled = true
//! capacity = 5
//! refill_rate = 1.0
//!
//! [telemetry]
//! log_level = "info"
//! log_format = "json"
//! metrics_enabled = true
//! metrics_path = "/metrics"
//!
//! [oauth]
//! client_id = "..."
//! client_secret = "..."
//! redirect_url = "http://localhost:7171/callback"
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::TollgateConfig;
pub use error::ConfigError;
pub use loader::{vars, ConfigLoader};
pub use schema::{OAuthSection, RateLimitSection, ServerSection, TelemetrySection};
pub use tollgate_telemetry::LogFormat;
