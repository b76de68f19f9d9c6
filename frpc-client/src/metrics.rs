//! Client metrics definitions
//!
//! OpenTelemetry instruments recorded by the invocation engine and the
//! WebSocket transport when observability is enabled through
//! `ClientBuilder::with_observability()`.
//!
//! # Metrics Collected
//!
//! - **connection_state**: 1 while the transport is connected, 0 after it closed (gauge)
//! - **requests_total**: calls issued, by method and status (counter)
//! - **request_duration**: call latency in seconds (histogram)
//! - **errors_total**: failed calls, by error type (counter)
//! - **late_replies**: replies that arrived after their call was over (counter)

use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter},
    KeyValue,
};

/// Client metrics for monitoring
pub struct ClientMetrics {
    pub connection_state: Gauge<i64>,
    pub requests_total: Counter<u64>,
    pub request_duration: Histogram<f64>,
    pub errors_total: Counter<u64>,
    pub late_replies: Counter<u64>,
}

impl ClientMetrics {
    pub fn new(service_name: impl Into<String>) -> Self {
        let name: &'static str = Box::leak(service_name.into().into_boxed_str());
        let meter = global::meter(name);
        Self::new_with_meter(&meter)
    }

    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            connection_state: meter
                .i64_gauge("frpc.client.connection.state")
                .with_description("Connection state (0=closed, 1=connected)")
                .build(),
            requests_total: meter
                .u64_counter("frpc.client.requests.total")
                .with_description("Total number of calls issued")
                .build(),
            request_duration: meter
                .f64_histogram("frpc.client.request.duration")
                .with_description("Call duration in seconds")
                .build(),
            errors_total: meter
                .u64_counter("frpc.client.errors.total")
                .with_description("Total number of failed calls")
                .build(),
            late_replies: meter
                .u64_counter("frpc.client.late_replies.total")
                .with_description("Replies dropped because their call was no longer pending")
                .build(),
        }
    }

    pub fn update_connection_state(&self, state: i64) {
        self.connection_state.record(state, &[]);
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

    pub fn record_late_reply(&self) {
        self.late_replies.add(1, &[]);
    }
}
