//! Prometheus exporter behind the core `MetricsCollector` seam.

use metrics::Label;
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use tcc_core::config::DeploymentLabels;
use tcc_core::metrics::{Labels, METRICS, MetricKind, MetricsCollector};

/// Forwards every call to the globally installed `metrics` recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusMetrics;

/// Install the Prometheus recorder and start its HTTP listener.
///
/// Deployment labels are attached to every series as global labels.
/// Must be called from within the Tokio runtime.
pub fn install(
    listen: SocketAddr,
    deployment: &DeploymentLabels,
) -> Result<PrometheusMetrics, BuildError> {
    let mut builder = PrometheusBuilder::new().with_http_listener(listen);
    for (key, value) in deployment.pairs() {
        builder = builder.add_global_label(key, value);
    }
    for metric in METRICS.iter().filter(|m| m.kind == MetricKind::Histogram) {
        builder =
            builder.set_buckets_for_metric(Matcher::Full(metric.name.to_string()), metric.buckets)?;
    }
    builder.install()?;

    for metric in METRICS {
        match metric.kind {
            MetricKind::Counter => metrics::describe_counter!(metric.name, metric.help),
            MetricKind::Gauge => metrics::describe_gauge!(metric.name, metric.help),
            MetricKind::Histogram => metrics::describe_histogram!(metric.name, metric.help),
        }
    }

    tracing::info!(%listen, "Metrics endpoint listening");
    Ok(PrometheusMetrics)
}

fn to_labels(labels: Labels<'_>) -> Vec<Label> {
    labels
        .iter()
        .map(|(key, value)| Label::new(*key, value.to_string()))
        .collect()
}

impl MetricsCollector for PrometheusMetrics {
    fn increment_counter(&self, name: &'static str, labels: Labels<'_>) {
        metrics::counter!(name, to_labels(labels)).increment(1);
    }

    fn record_histogram(&self, name: &'static str, labels: Labels<'_>, value: f64) {
        metrics::histogram!(name, to_labels(labels)).record(value);
    }

    fn set_gauge(&self, name: &'static str, labels: Labels<'_>, value: f64) {
        metrics::gauge!(name, to_labels(labels)).set(value);
    }

    fn increment_gauge(&self, name: &'static str, labels: Labels<'_>, delta: f64) {
        metrics::gauge!(name, to_labels(labels)).increment(delta);
    }

    fn decrement_gauge(&self, name: &'static str, labels: Labels<'_>, delta: f64) {
        metrics::gauge!(name, to_labels(labels)).decrement(delta);
    }

    /// Exported as a gauge fixed at 1 with the info as labels.
    fn record_info(&self, name: &'static str, info: Labels<'_>) {
        metrics::gauge!(name, to_labels(info)).set(1.0);
    }
}
