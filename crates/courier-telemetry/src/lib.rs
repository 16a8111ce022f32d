//! Telemetry contracts and invocation-context propagation for Courier.
//!
//! Defines the narrow sink interfaces (metrics, traces, APM transactions,
//! latency) consumed by the dispatcher and the resilient API client, concrete
//! span/transaction value types that are finished exactly once, in-memory sink
//! implementations for embedding processes and tests, and the task-local
//! invocation context that makes correlation data visible across an
//! invocation's async continuation chain.

pub mod context;
pub mod latency;
pub mod metrics;
pub mod span;
pub mod transaction;

pub use context::{Invocation, InvocationKind};
pub use latency::{InMemoryLatencyTracker, LatencyTracker};
pub use metrics::{tag, InMemoryMetricsSink, MetricsSink};
pub use span::{FinishedSpan, InMemoryTraceSink, SpanStatus, TelemetrySpan, TraceSink};
pub use transaction::{
    ApmSink, ApmTransaction, FinishedTransaction, InMemoryApmSink, TransactionOutcome,
};

/// Installs a process-wide `tracing` subscriber honoring `RUST_LOG`.
///
/// Safe to call more than once; only the first call takes effect.
pub fn install_tracing_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
