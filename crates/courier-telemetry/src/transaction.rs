//! APM-style transactions delivered to an APM sink on end.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;

/// Transaction outcome. Set at most once; later writes are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransactionOutcome {
    Unknown,
    Success,
    Failure,
}

impl TransactionOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// A completed transaction as delivered to an [`ApmSink`].
#[derive(Debug, Clone, Serialize)]
pub struct FinishedTransaction {
    pub name: String,
    pub transaction_type: String,
    pub labels: Vec<(String, String)>,
    pub outcome: TransactionOutcome,
    pub captured_errors: Vec<String>,
    pub duration_ms: u64,
}

/// APM backend contract. Receives each ended transaction exactly once.
pub trait ApmSink: Send + Sync {
    fn record_transaction(&self, transaction: FinishedTransaction);
}

/// An open transaction mirroring the root span of an invocation.
pub struct ApmTransaction {
    name: String,
    transaction_type: String,
    labels: Vec<(String, String)>,
    outcome: TransactionOutcome,
    captured_errors: Vec<String>,
    started: Instant,
    sink: Arc<dyn ApmSink>,
    delivered: bool,
}

impl ApmTransaction {
    pub fn start(
        sink: Arc<dyn ApmSink>,
        name: impl Into<String>,
        transaction_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            transaction_type: transaction_type.into(),
            labels: Vec::new(),
            outcome: TransactionOutcome::Unknown,
            captured_errors: Vec::new(),
            started: Instant::now(),
            sink,
            delivered: false,
        }
    }

    pub fn set_label(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.labels.push((key.into(), value.into()));
    }

    /// Records a fault description on the transaction.
    pub fn capture_error(&mut self, detail: &str) {
        self.captured_errors.push(detail.to_string());
    }

    /// Sets the outcome. An outcome already set wins.
    pub fn set_outcome(&mut self, outcome: TransactionOutcome) {
        if self.outcome == TransactionOutcome::Unknown {
            self.outcome = outcome;
        }
    }

    /// Ends the transaction and delivers it to the sink.
    pub fn end(mut self) {
        self.deliver();
    }

    fn deliver(&mut self) {
        if self.delivered {
            return;
        }
        self.delivered = true;
        let duration_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.sink.record_transaction(FinishedTransaction {
            name: std::mem::take(&mut self.name),
            transaction_type: std::mem::take(&mut self.transaction_type),
            labels: std::mem::take(&mut self.labels),
            outcome: self.outcome,
            captured_errors: std::mem::take(&mut self.captured_errors),
            duration_ms,
        });
    }
}

impl Drop for ApmTransaction {
    fn drop(&mut self) {
        self.deliver();
    }
}

/// APM sink retaining ended transactions in memory.
#[derive(Default)]
pub struct InMemoryApmSink {
    transactions: Mutex<Vec<FinishedTransaction>>,
}

impl InMemoryApmSink {
    pub fn finished_transactions(&self) -> Vec<FinishedTransaction> {
        self.transactions
            .lock()
            .expect("apm sink lock poisoned")
            .clone()
    }
}

impl ApmSink for InMemoryApmSink {
    fn record_transaction(&self, transaction: FinishedTransaction) {
        self.transactions
            .lock()
            .expect("apm sink lock poisoned")
            .push(transaction);
    }
}
