//! Metrics sink contract and an in-memory implementation.
//!
//! Metric tags must stay low-cardinality: command names and status labels are
//! allowed, actor and origin identifiers are not (those belong on traces and
//! logs only).

use std::collections::HashMap;
use std::sync::Mutex;

/// Builds one metric tag pair.
pub fn tag(key: &str, value: impl Into<String>) -> (String, String) {
    (key.to_string(), value.into())
}

/// Metrics backend contract. Implementations must tolerate concurrent calls
/// from many invocations.
pub trait MetricsSink: Send + Sync {
    fn increment_counter(&self, name: &str, tags: &[(String, String)]);
    fn record_histogram(&self, name: &str, value: u64, tags: &[(String, String)]);
    fn adjust_gauge(&self, name: &str, delta: i64);
}

fn series_key(name: &str, tags: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = tags.iter().collect();
    sorted.sort();
    let rendered: Vec<String> = sorted
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    format!("{name}{{{}}}", rendered.join(","))
}

/// Metrics sink retaining series in process memory.
#[derive(Default)]
pub struct InMemoryMetricsSink {
    counters: Mutex<HashMap<String, u64>>,
    histograms: Mutex<HashMap<String, Vec<u64>>>,
    gauges: Mutex<HashMap<String, i64>>,
}

impl InMemoryMetricsSink {
    pub fn counter_value(&self, name: &str, tags: &[(String, String)]) -> u64 {
        self.counters
            .lock()
            .expect("metrics lock poisoned")
            .get(&series_key(name, tags))
            .copied()
            .unwrap_or(0)
    }

    pub fn histogram_values(&self, name: &str, tags: &[(String, String)]) -> Vec<u64> {
        self.histograms
            .lock()
            .expect("metrics lock poisoned")
            .get(&series_key(name, tags))
            .cloned()
            .unwrap_or_default()
    }

    pub fn gauge_value(&self, name: &str) -> i64 {
        self.gauges
            .lock()
            .expect("metrics lock poisoned")
            .get(name)
            .copied()
            .unwrap_or(0)
    }
}

impl MetricsSink for InMemoryMetricsSink {
    fn increment_counter(&self, name: &str, tags: &[(String, String)]) {
        let mut counters = self.counters.lock().expect("metrics lock poisoned");
        *counters.entry(series_key(name, tags)).or_insert(0) += 1;
    }

    fn record_histogram(&self, name: &str, value: u64, tags: &[(String, String)]) {
        let mut histograms = self.histograms.lock().expect("metrics lock poisoned");
        histograms
            .entry(series_key(name, tags))
            .or_default()
            .push(value);
    }

    fn adjust_gauge(&self, name: &str, delta: i64) {
        let mut gauges = self.gauges.lock().expect("metrics lock poisoned");
        *gauges.entry(name.to_string()).or_insert(0) += delta;
    }
}
