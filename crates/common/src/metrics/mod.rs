//! Metrics and observability utilities
//!
//! Metric names share the `iasp` prefix; the gateway installs the
//! Prometheus exporter, other binaries record into the no-op recorder.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all IASP metrics
pub const METRICS_PREFIX: &str = "iasp";

/// Histogram buckets for request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, // 5ms
    0.010, // 10ms
    0.025, // 25ms
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.500, // 2.5s
    5.000, // 5s
    10.00, // 10s
    30.00, // 30s, registry calls with large bundles
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    describe_counter!(
        format!("{}_submissions_total", METRICS_PREFIX),
        Unit::Count,
        "Applications submitted"
    );

    describe_counter!(
        format!("{}_registrations_total", METRICS_PREFIX),
        Unit::Count,
        "Registry registration attempts by outcome"
    );

    describe_histogram!(
        format!("{}_registry_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Registry call latency in seconds"
    );

    describe_histogram!(
        format!("{}_bundle_assembly_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Document bundle assembly latency in seconds"
    );

    describe_counter!(
        format!("{}_reviews_total", METRICS_PREFIX),
        Unit::Count,
        "Commission review changes by action"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

pub fn record_submission() {
    counter!(format!("{}_submissions_total", METRICS_PREFIX)).increment(1);
}

/// `outcome` is one of registered, skipped, failed
pub fn record_registration(outcome: &str, duration_secs: Option<f64>) {
    counter!(
        format!("{}_registrations_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    if let Some(duration) = duration_secs {
        histogram!(format!("{}_registry_duration_seconds", METRICS_PREFIX)).record(duration);
    }
}

pub fn record_bundle_assembly(duration_secs: f64, reused: bool) {
    histogram!(
        format!("{}_bundle_assembly_duration_seconds", METRICS_PREFIX),
        "reused" => reused.to_string()
    )
    .record(duration_secs);
}

/// `action` is upsert or delete
pub fn record_review(action: &str) {
    counter!(
        format!("{}_reviews_total", METRICS_PREFIX),
        "action" => action.to_string()
    )
    .increment(1);
}
