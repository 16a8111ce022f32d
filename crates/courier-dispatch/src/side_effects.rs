//! Supervised queue for fire-and-forget completion side effects.
//!
//! Audit persistence and live-update broadcast must never fail an invocation,
//! but literal detached tasks make failures invisible. Side effects are
//! enqueued onto an unbounded channel drained by one supervised worker that
//! catches and logs each failure. The worker ends once every queue handle is
//! dropped and the channel drains, so callers can await the join handle for
//! quiescence.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Audit-log entry for one completed invocation.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub correlation_id: String,
    pub command_name: Option<String>,
    pub duration_ms: u64,
    pub success: bool,
    pub error_message: Option<String>,
    pub completed_unix_ms: u64,
}

/// Completion notification for live-update subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionEvent {
    pub correlation_id: String,
    pub kind: String,
    pub command_name: Option<String>,
    pub duration_ms: u64,
    pub completed_unix_ms: u64,
}

/// Persistence collaborator for invocation audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log_invocation(&self, record: AuditRecord) -> anyhow::Result<()>;
}

/// Live-update collaborator notified of completed invocations.
#[async_trait]
pub trait CompletionBroadcaster: Send + Sync {
    async fn broadcast(&self, event: CompletionEvent) -> anyhow::Result<()>;
}

enum SideEffect {
    Audit(AuditRecord),
    Broadcast(CompletionEvent),
}

/// Producer handle feeding the supervised worker.
#[derive(Clone)]
pub struct SideEffectQueue {
    tx: mpsc::UnboundedSender<SideEffect>,
}

impl SideEffectQueue {
    pub fn enqueue_audit(&self, record: AuditRecord) {
        if self.tx.send(SideEffect::Audit(record)).is_err() {
            tracing::warn!("side-effect worker is gone, dropping audit record");
        }
    }

    pub fn enqueue_broadcast(&self, event: CompletionEvent) {
        if self.tx.send(SideEffect::Broadcast(event)).is_err() {
            tracing::warn!("side-effect worker is gone, dropping completion event");
        }
    }
}

/// Spawns the worker draining queued side effects with isolated error
/// handling.
pub fn spawn_side_effect_worker(
    audit: Arc<dyn AuditSink>,
    broadcaster: Arc<dyn CompletionBroadcaster>,
) -> (SideEffectQueue, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        while let Some(effect) = rx.recv().await {
            match effect {
                SideEffect::Audit(record) => {
                    let correlation_id = record.correlation_id.clone();
                    if let Err(error) = audit.log_invocation(record).await {
                        tracing::warn!(
                            correlation_id = %correlation_id,
                            error = %error,
                            "failed to persist invocation audit record"
                        );
                    }
                }
                SideEffect::Broadcast(event) => {
                    let correlation_id = event.correlation_id.clone();
                    if let Err(error) = broadcaster.broadcast(event).await {
                        tracing::warn!(
                            correlation_id = %correlation_id,
                            error = %error,
                            "failed to broadcast completion event"
                        );
                    }
                }
            }
        }
    });
    (SideEffectQueue { tx }, handle)
}
