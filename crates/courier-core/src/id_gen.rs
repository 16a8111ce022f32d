//! Opaque identifier generation for invocations, traces, and spans.
//!
//! Identifiers combine a millisecond timestamp with a process-local counter so
//! they stay unique within a process without coordination and sort roughly by
//! creation time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(1);
static TRACE_COUNTER: AtomicU64 = AtomicU64::new(1);
static SPAN_COUNTER: AtomicU64 = AtomicU64::new(1);

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Returns a fresh correlation id joining logs, traces, and metrics for one
/// invocation. Never reused within a process.
pub fn new_correlation_id() -> String {
    let count = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("courier-{}-{count}", now_millis())
}

/// Returns a fresh trace id for a new invocation's span hierarchy.
pub fn new_trace_id() -> String {
    let count = TRACE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}{count:08x}", now_millis())
}

/// Returns a fresh span id.
pub fn new_span_id() -> String {
    let count = SPAN_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{count:x}", now_millis())
}
