//! Server metrics definitions
//!
//! This module defines OpenTelemetry metrics for monitoring server health
//! and performance. Metrics are exported to the configured OTLP endpoint.
//!
//! # Metrics Collected
//!
//! - **connections_active**: Current number of active WebSocket connections (gauge)
//! - **connections_total**: Total connections since startup (counter)
//! - **requests_total**: Calls dispatched, by method and status (counter)
//! - **request_duration**: Handler plus write latency distribution (histogram)
//! - **errors_total**: Total errors encountered (counter)
//!
//! # Usage
//!
//! Metrics are automatically recorded when observability is enabled via
//! `ServerBuilder::with_observability()`.
//!
//! # Examples
//!
//! ```rust,no_run
//! use frpc_server::ServerMetrics;
//!
//! let metrics = ServerMetrics::new("my-service");
//!
//! metrics.record_connection(5);
//! metrics.record_request("blah", "success", 0.025);
//! ```

use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter},
    KeyValue,
};

/// Server metrics for monitoring
///
/// All metrics are prefixed with `frpc.server.*`.
pub struct ServerMetrics {
    /// Number of active connections
    pub connections_active: Gauge<i64>,
    /// Total number of connections (cumulative)
    pub connections_total: Counter<u64>,
    /// Total number of calls dispatched
    pub requests_total: Counter<u64>,
    /// Call processing duration in seconds
    pub request_duration: Histogram<f64>,
    /// Total number of errors
    pub errors_total: Counter<u64>,
}

impl ServerMetrics {
    pub fn new(service_name: impl Into<String>) -> Self {
        let name: &'static str = Box::leak(service_name.into().into_boxed_str());
        let meter = global::meter(name);
        Self::new_with_meter(&meter)
    }

    /// Create a new ServerMetrics instance with a custom meter
    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            connections_active: meter
                .i64_gauge("frpc.server.connections.active")
                .with_description("Number of active WebSocket connections")
                .build(),
            connections_total: meter
                .u64_counter("frpc.server.connections.total")
                .with_description("Total number of connections established")
                .build(),
            requests_total: meter
                .u64_counter("frpc.server.requests.total")
                .with_description("Total number of calls dispatched")
                .build(),
            request_duration: meter
                .f64_histogram("frpc.server.request.duration")
                .with_description("Call processing duration in seconds")
                .build(),
            errors_total: meter
                .u64_counter("frpc.server.errors.total")
                .with_description("Total number of errors encountered")
                .build(),
        }
    }

    /// Record a new connection
    pub fn record_connection(&self, active: i64) {
        self.connections_active.record(active, &[]);
        self.connections_total.add(1, &[]);
    }

    /// Record a disconnection
    pub fn record_disconnection(&self, active: i64) {
        self.connections_active.record(active, &[]);
    }

    pub fn record_request(&self, method: &str, status: &str, duration_secs: f64) {
        let attributes = &[
            KeyValue::new("method", method.to_string()),
            KeyValue::new("status", status.to_string()),
        ];
        self.requests_total.add(1, attributes);
        self.request_duration.record(duration_secs, attributes);
    }

    pub fn record_error(&self, error_type: &str) {
        let attributes = &[KeyValue::new("error_type", error_type.to_string())];
        self.errors_total.add(1, attributes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = ServerMetrics::new("test-server");

        // Just test that metrics can be created without panicking
        metrics.record_connection(1);
        metrics.record_request("blah", "success", 0.1);
        metrics.record_error("decode");
        metrics.record_disconnection(0);
    }

    #[test]
    fn test_connection_metrics() {
        let metrics = ServerMetrics::new("test-server-conn");

        metrics.record_connection(1);
        metrics.record_connection(2);
        metrics.record_disconnection(1);
        metrics.record_disconnection(0);
    }
}
