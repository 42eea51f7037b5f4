use std::collections::HashMap;
use std::sync::Mutex;

use super::lock;
use crate::metrics::{Labels, MetricsCollector};

type SeriesKey = (String, Vec<(String, String)>);

fn series(name: &str, labels: &[(&str, &str)]) -> SeriesKey {
    let mut labels: Vec<(String, String)> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    labels.sort();
    (name.to_string(), labels)
}

/// [`MetricsCollector`] that keeps every sample in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: Mutex<HashMap<SeriesKey, f64>>,
    gauges: Mutex<HashMap<SeriesKey, f64>>,
    gauge_peaks: Mutex<HashMap<SeriesKey, f64>>,
    histograms: Mutex<HashMap<SeriesKey, Vec<f64>>>,
    info: Mutex<HashMap<String, Vec<(String, String)>>>,
}

impl InMemoryMetrics {
    /// Counter value for an exact label set, `0.0` if never incremented.
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        lock(&self.counters)
            .get(&series(name, labels))
            .copied()
            .unwrap_or(0.0)
    }

    /// Sum of a counter over all label sets.
    pub fn counter_total(&self, name: &str) -> f64 {
        lock(&self.counters)
            .iter()
            .filter(|((n, _), _)| n == name)
            .map(|(_, v)| v)
            .sum()
    }

    pub fn gauge(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        lock(&self.gauges).get(&series(name, labels)).copied()
    }

    /// Highest value a gauge ever held.
    pub fn gauge_peak(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        lock(&self.gauge_peaks).get(&series(name, labels)).copied()
    }

    fn track_peak(&self, key: SeriesKey, value: f64) {
        let mut peaks = lock(&self.gauge_peaks);
        let peak = peaks.entry(key).or_insert(value);
        *peak = peak.max(value);
    }

    /// Samples of a histogram across all label sets.
    pub fn histogram(&self, name: &str) -> Vec<f64> {
        lock(&self.histograms)
            .iter()
            .filter(|((n, _), _)| n == name)
            .flat_map(|(_, samples)| samples.iter().copied())
            .collect()
    }

    pub fn info(&self, name: &str) -> Option<Vec<(String, String)>> {
        lock(&self.info).get(name).cloned()
    }
}

impl MetricsCollector for InMemoryMetrics {
    fn increment_counter(&self, name: &'static str, labels: Labels<'_>) {
        *lock(&self.counters).entry(series(name, labels)).or_default() += 1.0;
    }

    fn record_histogram(&self, name: &'static str, labels: Labels<'_>, value: f64) {
        lock(&self.histograms)
            .entry(series(name, labels))
            .or_default()
            .push(value);
    }

    fn set_gauge(&self, name: &'static str, labels: Labels<'_>, value: f64) {
        let key = series(name, labels);
        lock(&self.gauges).insert(key.clone(), value);
        self.track_peak(key, value);
    }

    fn increment_gauge(&self, name: &'static str, labels: Labels<'_>, delta: f64) {
        let key = series(name, labels);
        let value = {
            let mut gauges = lock(&self.gauges);
            let gauge = gauges.entry(key.clone()).or_default();
            *gauge += delta;
            *gauge
        };
        self.track_peak(key, value);
    }

    fn decrement_gauge(&self, name: &'static str, labels: Labels<'_>, delta: f64) {
        *lock(&self.gauges).entry(series(name, labels)).or_default() -= delta;
    }

    fn record_info(&self, name: &'static str, info: Labels<'_>) {
        let (_, labels) = series(name, info);
        lock(&self.info).insert(name.to_string(), labels);
    }
}
