//! Metrics collection and export for Chirp.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use chirp_core::Delivery;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const STREAMS_TOTAL: &str = "chirp_streams_total";
    pub const STREAMS_ACTIVE: &str = "chirp_streams_active";
    pub const MESSAGES_PUBLISHED: &str = "chirp_messages_published_total";
    pub const MESSAGES_REJECTED: &str = "chirp_messages_rejected_total";
    pub const DELIVERIES_TOTAL: &str = "chirp_deliveries_total";
    pub const SUBSCRIBERS_DROPPED: &str = "chirp_subscribers_dropped_total";
    pub const POLLS_TOTAL: &str = "chirp_polls_total";
    pub const PUBLISH_SECONDS: &str = "chirp_publish_seconds";
    pub const ERRORS_TOTAL: &str = "chirp_errors_total";
}

/// Register metric descriptions with the installed recorder.
fn describe_metrics() {
    metrics::describe_counter!(
        names::STREAMS_TOTAL,
        "Total number of push streams opened since server start"
    );
    metrics::describe_gauge!(names::STREAMS_ACTIVE, "Current number of open push streams");
    metrics::describe_counter!(names::MESSAGES_PUBLISHED, "Total number of messages stored");
    metrics::describe_counter!(
        names::MESSAGES_REJECTED,
        "Total number of publishes refused by validation"
    );
    metrics::describe_counter!(names::DELIVERIES_TOTAL, "Total number of frames fanned out");
    metrics::describe_counter!(
        names::SUBSCRIBERS_DROPPED,
        "Total number of subscribers removed after a failed write"
    );
    metrics::describe_counter!(names::POLLS_TOTAL, "Total number of poll requests");
    metrics::describe_histogram!(names::PUBLISH_SECONDS, "Publish latency in seconds");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of internal errors");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    // Descriptions are dropped unless a recorder is already installed.
    describe_metrics();

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record an accepted publish and its fan-out.
pub fn record_publish(topic: &str, delivery: Delivery, seconds: f64) {
    counter!(names::MESSAGES_PUBLISHED, "topic" => topic.to_string()).increment(1);
    counter!(names::DELIVERIES_TOTAL, "topic" => topic.to_string())
        .increment(delivery.delivered as u64);
    if delivery.dropped > 0 {
        counter!(names::SUBSCRIBERS_DROPPED, "topic" => topic.to_string())
            .increment(delivery.dropped as u64);
    }
    histogram!(names::PUBLISH_SECONDS, "topic" => topic.to_string()).record(seconds);
}

/// Record a publish refused by validation.
pub fn record_rejected(topic: &str) {
    counter!(names::MESSAGES_REJECTED, "topic" => topic.to_string()).increment(1);
}

/// Record a poll.
pub fn record_poll(topic: &str) {
    counter!(names::POLLS_TOTAL, "topic" => topic.to_string()).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Metrics guard that records the end of a push stream on drop.
pub struct StreamMetricsGuard {
    topic: String,
}

impl StreamMetricsGuard {
    /// Create a new metrics guard, recording an opened stream.
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        let topic = topic.into();
        counter!(names::STREAMS_TOTAL, "topic" => topic.clone()).increment(1);
        gauge!(names::STREAMS_ACTIVE, "topic" => topic.clone()).increment(1.0);
        Self { topic }
    }
}

impl Drop for StreamMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::STREAMS_ACTIVE, "topic" => self.topic.clone()).decrement(1.0);
    }
}
