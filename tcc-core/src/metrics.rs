//! Metric names, label keys and the collector seam.
//!
//! The pipeline reports through [`MetricsCollector`]. The server installs a
//! Prometheus-backed collector that adds the deployment labels to every
//! sample; tests use an in-memory one.

use std::sync::Arc;

pub type Labels<'a> = &'a [(&'static str, &'a str)];

pub type SharedMetrics = Arc<dyn MetricsCollector>;

pub trait MetricsCollector: Send + Sync {
    fn increment_counter(&self, name: &'static str, labels: Labels<'_>);
    fn record_histogram(&self, name: &'static str, labels: Labels<'_>, value: f64);
    fn set_gauge(&self, name: &'static str, labels: Labels<'_>, value: f64);
    fn increment_gauge(&self, name: &'static str, labels: Labels<'_>, delta: f64);
    fn decrement_gauge(&self, name: &'static str, labels: Labels<'_>, delta: f64);
    /// Export a constant `1` gauge carrying `info` as labels.
    fn record_info(&self, name: &'static str, info: Labels<'_>);
}

pub const MESSAGES_CONSUMED: &str = "kafka_consumer_kafka_messages_consumed_total";
pub const MESSAGE_PROCESSING_DURATION: &str = "kafka_consumer_kafka_message_processing_duration_seconds";
pub const END_TO_END_LATENCY: &str = "kafka_consumer_message_end_to_end_latency_seconds";
pub const MESSAGES_PER_SECOND: &str = "kafka_consumer_kafka_messages_per_second";
pub const PROCESSING_ERRORS: &str = "kafka_consumer_kafka_processing_errors_total";
pub const DESERIALIZATION_ERRORS: &str = "kafka_consumer_kafka_deserialization_errors_total";
pub const VERAMO_REQUESTS: &str = "kafka_consumer_veramo_requests_total";
pub const VERAMO_REQUEST_DURATION: &str = "kafka_consumer_veramo_request_duration_seconds";
pub const CONSUMER_LAG: &str = "kafka_consumer_kafka_consumer_lag";
pub const ACTIVE_CONSUMERS: &str = "kafka_consumer_kafka_active_consumers";
pub const APPLICATION_INFO: &str = "kafka_consumer_kafka_consumer_application_info";
pub const MESSAGE_SIZE: &str = "kafka_consumer_kafka_message_size_bytes";
pub const CREDENTIAL_VERIFICATION_DURATION: &str =
    "kafka_consumer_credential_verification_duration_seconds";
pub const CREDENTIAL_VERIFICATION_RESULTS: &str =
    "kafka_consumer_credential_verification_results_total";
pub const ACTIVE_VERIFICATION_WORKERS: &str = "kafka_consumer_verification_active_workers";
pub const WORK_QUEUE_DEPTH: &str = "kafka_consumer_verification_work_queue_depth";

pub const TOPIC: &str = "topic";
pub const STATUS: &str = "status";
pub const ERROR_TYPE: &str = "error_type";
pub const ENDPOINT: &str = "endpoint";
pub const STATUS_CODE: &str = "status_code";
pub const RESULT: &str = "result";

/// `error_type` values recorded against [`PROCESSING_ERRORS`].
pub mod error_type {
    pub const KAFKA_ERROR: &str = "kafka_error";
    pub const POLLING_ERROR: &str = "polling_error";
    pub const VERIFICATION_TRANSPORT: &str = "verification_transport_error";
    pub const VERIFICATION_API: &str = "verification_api_error";
    pub const VERIFICATION_DECODE: &str = "verification_decode_error";
    pub const PERMIT_UNAVAILABLE: &str = "permit_unavailable";
    pub const LOG_QUEUE_CLOSED: &str = "log_queue_closed";
    pub const WORK_QUEUE_CLOSED: &str = "work_queue_closed";
    pub const SHUTDOWN_ABANDONED: &str = "shutdown_abandoned";
    pub const CANCELLED: &str = "cancelled";
    pub const RENDER_ERROR: &str = "render_error";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

/// Registration data for one exported metric.
#[derive(Debug, Clone, Copy)]
pub struct MetricDescription {
    pub name: &'static str,
    pub kind: MetricKind,
    pub help: &'static str,
    /// Histogram buckets. Empty for counters and gauges.
    pub buckets: &'static [f64],
}

const fn counter(name: &'static str, help: &'static str) -> MetricDescription {
    MetricDescription {
        name,
        kind: MetricKind::Counter,
        help,
        buckets: &[],
    }
}

const fn gauge(name: &'static str, help: &'static str) -> MetricDescription {
    MetricDescription {
        name,
        kind: MetricKind::Gauge,
        help,
        buckets: &[],
    }
}

const fn histogram(
    name: &'static str,
    help: &'static str,
    buckets: &'static [f64],
) -> MetricDescription {
    MetricDescription {
        name,
        kind: MetricKind::Histogram,
        help,
        buckets,
    }
}

/// Every metric the consumer exports.
pub const METRICS: &[MetricDescription] = &[
    counter(MESSAGES_CONSUMED, "Total number of messages consumed from Kafka"),
    histogram(
        MESSAGE_PROCESSING_DURATION,
        "Time spent processing each message",
        &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0],
    ),
    histogram(
        END_TO_END_LATENCY,
        "Latency from message origination to processing completion",
        &[0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0],
    ),
    gauge(MESSAGES_PER_SECOND, "Current message consumption rate"),
    counter(PROCESSING_ERRORS, "Total number of processing errors"),
    counter(DESERIALIZATION_ERRORS, "Total number of deserialization errors"),
    counter(VERAMO_REQUESTS, "Total number of requests to the verification agent"),
    histogram(
        VERAMO_REQUEST_DURATION,
        "Duration of requests to the verification agent",
        &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
    ),
    gauge(CONSUMER_LAG, "Seconds since the last message was received per topic"),
    gauge(ACTIVE_CONSUMERS, "Number of active Kafka consumers"),
    gauge(APPLICATION_INFO, "Kafka consumer application information"),
    histogram(
        MESSAGE_SIZE,
        "Size of consumed messages in bytes",
        &[100.0, 500.0, 1000.0, 5000.0, 10000.0, 50000.0, 100000.0, 500000.0],
    ),
    histogram(
        CREDENTIAL_VERIFICATION_DURATION,
        "Time spent verifying credentials",
        &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0],
    ),
    counter(CREDENTIAL_VERIFICATION_RESULTS, "Credential verification results"),
    gauge(ACTIVE_VERIFICATION_WORKERS, "Verification workers currently running"),
    gauge(WORK_QUEUE_DEPTH, "Items buffered on the work queue when a worker took one"),
];
