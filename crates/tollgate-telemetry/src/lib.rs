//! Logging and request metrics for Tollgate.
//!
//! - **Logging**: structured JSON (or pretty) output via `tracing-subscriber`
//! - **Metrics**: per-route request counters in Prometheus text format, plus
//!   process-level gauges through the `metrics` facade
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `http_requests_total` | Counter | `path`, `method` | Requests offered to the service |
//! | `tollgate_in_flight_connections` | Gauge | - | Connections being served |
//! | `tollgate_drain_outcomes_total` | Counter | `outcome` | Shutdown drains by outcome |
//!
//! # Example
//!
//! ```rust,ignore
//! use tollgate_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let handle = init_telemetry(&TelemetryConfig::default())?;
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig, LogFormat};
pub use metrics::{
    init_metrics, InFlightGuard, MetricsConfig, MetricsRecorder, MetricsSnapshot, RequestKey,
};
pub use metrics_exporter_prometheus::PrometheusHandle;

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging, then metrics.
///
/// Returns the Prometheus handle for the process-level gauges when metrics are
/// enabled.
///
/// # Errors
///
/// Returns `TelemetryError` if either subsystem fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<Option<PrometheusHandle>> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)
}
