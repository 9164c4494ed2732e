//! Request metrics for Tollgate.
//!
//! The [`MetricsRecorder`] counts every dispatched request keyed by the
//! matched route template and HTTP method. It is an owned value shared by
//! `Arc`, so tests and independent servers never observe each other's counts.
//!
//! Process-level gauges (in-flight connections, drain outcomes) go through the
//! `metrics` facade and are rendered by a Prometheus recorder when one has been
//! installed with [`init_metrics`].
//!
//! # Exposition
//!
//! ```text
//! # HELP http_requests_total Number of requests processed, labeled by path and method.
//! # TYPE http_requests_total counter
//! http_requests_total{path="/users",method="GET"} 12
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use parking_lot::RwLock;

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Name of the per-route request counter.
pub const REQUESTS_TOTAL: &str = "http_requests_total";

/// Help text of the per-route request counter.
const REQUESTS_TOTAL_HELP: &str = "Number of requests processed, labeled by path and method.";

/// Gauge of connections currently being served.
pub const IN_FLIGHT_CONNECTIONS: &str = "tollgate_in_flight_connections";

/// Counter of completed drains, labeled by outcome.
pub const DRAIN_OUTCOMES_TOTAL: &str = "tollgate_drain_outcomes_total";

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are exposed.
    pub enabled: bool,

    /// Path the exposition endpoint is served on.
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/metrics".to_string(),
        }
    }
}

/// Key of a request counter: the matched route template and the method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
    path: String,
    method: String,
}

impl RequestKey {
    /// Creates a new key.
    pub fn new(path: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
        }
    }

    /// Returns the route path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the HTTP method.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }
}

/// Per-route request counters.
///
/// Recording takes a shared lock and bumps an atomic, so concurrent writers
/// to existing keys never contend on the map. A new key briefly takes the
/// exclusive lock to insert a zeroed counter. [`snapshot`](Self::snapshot)
/// takes the exclusive lock, which makes the copy a single point in time
/// across every key.
///
/// Counters saturate at `u64::MAX` instead of wrapping.
///
/// # Example
///
/// ```
/// use tollgate_telemetry::MetricsRecorder;
///
/// let recorder = MetricsRecorder::new();
/// recorder.record_request("/users", "GET");
/// recorder.record_request("/users", "GET");
///
/// assert_eq!(recorder.snapshot().get("/users", "GET"), 2);
/// ```
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    counters: RwLock<HashMap<RequestKey, AtomicU64>>,
}

impl MetricsRecorder {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the counter for `(path, method)` by one.
    pub fn record_request(&self, path: &str, method: &str) {
        {
            let counters = self.counters.read();
            if let Some(counter) = counters.get(&RequestKey::new(path, method)) {
                saturating_increment(counter);
                return;
            }
        }

        let mut counters = self.counters.write();
        let counter = counters
            .entry(RequestKey::new(path, method))
            .or_insert_with(|| AtomicU64::new(0));
        saturating_increment(counter);
    }

    /// Returns a point-in-time copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.counters.write();
        let counts = counters
            .iter()
            .map(|(key, value)| (key.clone(), value.load(Ordering::Acquire)))
            .collect();
        MetricsSnapshot { counts }
    }

    /// Renders the current counters in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.snapshot().render_prometheus()
    }
}

fn saturating_increment(counter: &AtomicU64) {
    // fetch_update only fails when the closure returns None, i.e. at u64::MAX.
    let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_add(1));
}

/// Immutable copy of the request counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    counts: BTreeMap<RequestKey, u64>,
}

impl MetricsSnapshot {
    /// Returns the count for `(path, method)`, or zero if never observed.
    #[must_use]
    pub fn get(&self, path: &str, method: &str) -> u64 {
        self.counts
            .get(&RequestKey::new(path, method))
            .copied()
            .unwrap_or(0)
    }

    /// Returns the number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Returns `true` if no request has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Returns the sum over every key.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts
            .values()
            .fold(0u64, |acc, n| acc.saturating_add(*n))
    }

    /// Iterates over the counters in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&RequestKey, u64)> {
        self.counts.iter().map(|(k, v)| (k, *v))
    }

    /// Renders the snapshot in Prometheus text exposition format.
    #[must_use]
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# HELP {REQUESTS_TOTAL} {REQUESTS_TOTAL_HELP}");
        let _ = writeln!(out, "# TYPE {REQUESTS_TOTAL} counter");
        for (key, count) in &self.counts {
            let _ = writeln!(
                out,
                "{REQUESTS_TOTAL}{{path=\"{}\",method=\"{}\"}} {count}",
                escape_label(&key.path),
                escape_label(&key.method),
            );
        }
        out
    }
}

/// Escapes a Prometheus label value.
fn escape_label(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Installs a Prometheus recorder behind the `metrics` facade.
///
/// Returns `None` when metrics are disabled. The handle renders the
/// process-level gauges; per-route counters live in [`MetricsRecorder`].
///
/// # Errors
///
/// Returns `TelemetryError::MetricsInit` if a global recorder is already
/// installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<Option<PrometheusHandle>> {
    if !config.enabled {
        return Ok(None);
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    register_metric_descriptions();

    Ok(Some(handle))
}

fn register_metric_descriptions() {
    describe_gauge!(
        IN_FLIGHT_CONNECTIONS,
        "Number of HTTP connections currently being served"
    );
    describe_counter!(
        DRAIN_OUTCOMES_TOTAL,
        "Completed shutdown drains by outcome (clean or forced)"
    );
}

/// Records how a shutdown drain ended.
pub fn record_drain_outcome(forced: bool) {
    let outcome = if forced { "forced" } else { "clean" };
    counter!(DRAIN_OUTCOMES_TOTAL, "outcome" => outcome).increment(1);
}

/// Guard that keeps the in-flight connection gauge raised while alive.
#[derive(Debug)]
pub struct InFlightGuard {
    _private: (),
}

impl InFlightGuard {
    /// Increments the gauge and returns a guard that decrements it on drop.
    #[must_use]
    pub fn new() -> Self {
        gauge!(IN_FLIGHT_CONNECTIONS).increment(1.0);
        Self { _private: () }
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!(IN_FLIGHT_CONNECTIONS).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_record_creates_entry_lazily() {
        let recorder = MetricsRecorder::new();
        assert!(recorder.snapshot().is_empty());

        recorder.record_request("/users", "GET");
        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("/users", "GET"), 1);
        assert_eq!(snapshot.get("/users", "POST"), 0);
    }

    #[test]
    fn test_keys_are_distinct_by_method() {
        let recorder = MetricsRecorder::new();
        recorder.record_request("/users", "GET");
        recorder.record_request("/users", "DELETE");
        recorder.record_request("/users", "GET");

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.get("/users", "GET"), 2);
        assert_eq!(snapshot.get("/users", "DELETE"), 1);
        assert_eq!(snapshot.total(), 3);
    }

    #[test]
    fn test_snapshot_is_idempotent() {
        let recorder = MetricsRecorder::new();
        recorder.record_request("/", "GET");
        recorder.record_request("/health", "GET");

        assert_eq!(recorder.snapshot(), recorder.snapshot());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let recorder = MetricsRecorder::new();
        recorder.record_request("/", "GET");
        let before = recorder.snapshot();

        recorder.record_request("/", "GET");
        assert_eq!(before.get("/", "GET"), 1);
        assert_eq!(recorder.snapshot().get("/", "GET"), 2);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let recorder = Arc::new(MetricsRecorder::new());
        let threads = 8;
        let per_thread = 1_000;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let recorder = Arc::clone(&recorder);
                std::thread::spawn(move || {
                    for _ in 0..per_thread {
                        recorder.record_request("/users", "GET");
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(
            recorder.snapshot().get("/users", "GET"),
            threads * per_thread
        );
    }

    #[test]
    fn test_counter_saturates() {
        let counter = AtomicU64::new(u64::MAX - 1);
        saturating_increment(&counter);
        saturating_increment(&counter);
        assert_eq!(counter.load(Ordering::Acquire), u64::MAX);
    }

    #[test]
    fn test_render_prometheus() {
        let recorder = MetricsRecorder::new();
        recorder.record_request("/users", "GET");
        recorder.record_request("/create", "POST");

        let text = recorder.render();
        assert!(text.contains("# TYPE http_requests_total counter"));
        assert!(text.contains(r#"http_requests_total{path="/users",method="GET"} 1"#));
        assert!(text.contains(r#"http_requests_total{path="/create",method="POST"} 1"#));
    }

    #[test]
    fn test_escape_label() {
        assert_eq!(escape_label(r#"a"b"#), r#"a\"b"#);
        assert_eq!(escape_label("a\\b"), "a\\\\b");
        assert_eq!(escape_label("a\nb"), "a\\nb");
    }

    #[test]
    fn test_default_config() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert_eq!(config.path, "/metrics");
    }

    #[test]
    fn test_disabled_metrics_installs_nothing() {
        let config = MetricsConfig {
            enabled: false,
            ..MetricsConfig::default()
        };
        assert!(init_metrics(&config).unwrap().is_none());
    }

    #[test]
    fn test_facade_functions_dont_panic_without_recorder() {
        record_drain_outcome(true);
        record_drain_outcome(false);
        let guard = InFlightGuard::new();
        drop(guard);
    }
}
