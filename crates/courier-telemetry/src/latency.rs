//! Call-latency tracking contract for dashboarding outbound clients.

use std::sync::Mutex;

/// Latency collaborator keyed by a fixed logical client name.
pub trait LatencyTracker: Send + Sync {
    fn record_latency(&self, client_name: &str, duration_ms: u64);
}

/// Latency tracker retaining samples in memory.
#[derive(Default)]
pub struct InMemoryLatencyTracker {
    samples: Mutex<Vec<(String, u64)>>,
}

impl InMemoryLatencyTracker {
    pub fn samples_for(&self, client_name: &str) -> Vec<u64> {
        self.samples
            .lock()
            .expect("latency lock poisoned")
            .iter()
            .filter(|(name, _)| name == client_name)
            .map(|(_, duration_ms)| *duration_ms)
            .collect()
    }
}

impl LatencyTracker for InMemoryLatencyTracker {
    fn record_latency(&self, client_name: &str, duration_ms: u64) {
        self.samples
            .lock()
            .expect("latency lock poisoned")
            .push((client_name.to_string(), duration_ms));
    }
}
