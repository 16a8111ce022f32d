//! Hierarchical timing/attribute spans delivered to a trace sink on finish.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;

use courier_core::{new_span_id, new_trace_id};

/// Terminal status of a span. Set at most once; later writes are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpanStatus {
    Unset,
    Ok,
    Error,
}

impl SpanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

/// A completed span as delivered to a [`TraceSink`].
#[derive(Debug, Clone, Serialize)]
pub struct FinishedSpan {
    pub id: String,
    pub parent_id: Option<String>,
    pub trace_id: String,
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub status: SpanStatus,
    pub error_detail: Option<String>,
    pub duration_ms: u64,
}

impl FinishedSpan {
    /// Returns the first attribute value recorded under `key`, if any.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

/// Trace backend contract. Receives each finished span exactly once.
pub trait TraceSink: Send + Sync {
    fn record_span(&self, span: FinishedSpan);
}

/// An open span. Attributes accumulate during execution; the span is delivered
/// to its sink when finished, or on drop if a caller bails out early.
pub struct TelemetrySpan {
    id: String,
    parent_id: Option<String>,
    trace_id: String,
    name: String,
    attributes: Vec<(String, String)>,
    status: SpanStatus,
    error_detail: Option<String>,
    started: Instant,
    sink: Arc<dyn TraceSink>,
    delivered: bool,
}

impl TelemetrySpan {
    /// Opens a root span in a fresh trace.
    pub fn start(sink: Arc<dyn TraceSink>, name: impl Into<String>) -> Self {
        Self::start_with_id(sink, name, new_span_id(), new_trace_id())
    }

    /// Opens a span adopting pre-generated identifiers, used for invocation
    /// root spans whose ids were minted alongside the invocation context.
    pub fn start_with_id(
        sink: Arc<dyn TraceSink>,
        name: impl Into<String>,
        id: String,
        trace_id: String,
    ) -> Self {
        Self {
            id,
            parent_id: None,
            trace_id,
            name: name.into(),
            attributes: Vec::new(),
            status: SpanStatus::Unset,
            error_detail: None,
            started: Instant::now(),
            sink,
            delivered: false,
        }
    }

    /// Opens a child span inside an existing trace.
    pub fn start_in_trace(
        sink: Arc<dyn TraceSink>,
        name: impl Into<String>,
        trace_id: impl Into<String>,
        parent_id: Option<String>,
    ) -> Self {
        let mut span = Self::start_with_id(sink, name, new_span_id(), trace_id.into());
        span.parent_id = parent_id;
        span
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.push((key.into(), value.into()));
    }

    /// Marks the span successful. A status already set wins.
    pub fn set_ok(&mut self) {
        if self.status == SpanStatus::Unset {
            self.status = SpanStatus::Ok;
        }
    }

    /// Marks the span failed with a detail message. A status already set wins.
    pub fn set_error(&mut self, detail: impl Into<String>) {
        if self.status == SpanStatus::Unset {
            self.status = SpanStatus::Error;
            self.error_detail = Some(detail.into());
        }
    }

    /// Records a fault as both an attribute and the span's error status.
    pub fn record_exception(&mut self, detail: &str) {
        self.attributes
            .push(("exception".to_string(), detail.to_string()));
        self.set_error(detail);
    }

    /// Completes the span and delivers it to the sink.
    pub fn finish(mut self) {
        self.deliver();
    }

    fn deliver(&mut self) {
        if self.delivered {
            return;
        }
        self.delivered = true;
        let duration_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.sink.record_span(FinishedSpan {
            id: self.id.clone(),
            parent_id: self.parent_id.clone(),
            trace_id: self.trace_id.clone(),
            name: std::mem::take(&mut self.name),
            attributes: std::mem::take(&mut self.attributes),
            status: self.status,
            error_detail: self.error_detail.take(),
            duration_ms,
        });
    }
}

impl Drop for TelemetrySpan {
    fn drop(&mut self) {
        self.deliver();
    }
}

/// Trace sink retaining finished spans in memory.
#[derive(Default)]
pub struct InMemoryTraceSink {
    spans: Mutex<Vec<FinishedSpan>>,
}

impl InMemoryTraceSink {
    pub fn finished_spans(&self) -> Vec<FinishedSpan> {
        self.spans.lock().expect("trace sink lock poisoned").clone()
    }

    pub fn spans_named(&self, name: &str) -> Vec<FinishedSpan> {
        self.finished_spans()
            .into_iter()
            .filter(|span| span.name == name)
            .collect()
    }
}

impl TraceSink for InMemoryTraceSink {
    fn record_span(&self, span: FinishedSpan) {
        self.spans.lock().expect("trace sink lock poisoned").push(span);
    }
}
