//! Per-invocation dispatch state machine.
//!
//! Each gateway event runs through: classify, open root span + APM
//! transaction, resolve handler, execute inside the invocation context,
//! fan out completion telemetry, translate failures for the user, finalize.
//! Finalization (span close, transaction end, gauge decrement, context
//! clearing) runs on every exit path, including contained handler panics.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::Instrument;

use courier_core::current_unix_timestamp_ms;

use courier_telemetry::{
    tag, ApmSink, ApmTransaction, Invocation, MetricsSink, TelemetrySpan, TraceSink,
    TransactionOutcome,
};

use crate::event::{GatewayEvent, Responder, ResponseGate};
use crate::handler::HandlerError;
use crate::registry::RegisteredModuleSet;
use crate::side_effects::{AuditRecord, CompletionEvent, SideEffectQueue};

pub const COMMANDS_EXECUTED_COUNTER: &str = "commands_executed_total";
pub const COMMAND_DURATION_HISTOGRAM: &str = "command_duration_ms";
pub const ACTIVE_INVOCATIONS_GAUGE: &str = "active_invocations";

const TRANSACTION_TYPE: &str = "gateway";

/// The ordered set of telemetry sinks the dispatcher fans out to.
#[derive(Clone)]
pub struct TelemetryFanout {
    pub metrics: Arc<dyn MetricsSink>,
    pub trace: Arc<dyn TraceSink>,
    pub apm: Arc<dyn ApmSink>,
}

/// Event-driven entry point routing gateway events to registered handlers.
pub struct Dispatcher {
    modules: RegisteredModuleSet,
    telemetry: TelemetryFanout,
    side_effects: SideEffectQueue,
}

impl Dispatcher {
    pub fn new(
        modules: RegisteredModuleSet,
        telemetry: TelemetryFanout,
        side_effects: SideEffectQueue,
    ) -> Self {
        Self {
            modules,
            telemetry,
            side_effects,
        }
    }

    /// Processes one gateway event to completion. Faults are classified,
    /// translated, and recorded; nothing propagates back to the gateway.
    pub async fn dispatch(&self, event: GatewayEvent, responder: Arc<dyn Responder>) {
        let command_name = event.full_command_name();
        let invocation = Invocation::new(
            event.kind,
            command_name.clone(),
            event.actor_id.clone(),
            event.origin_id.clone(),
        );
        let correlation_id = invocation.correlation_id.clone();

        self.telemetry
            .metrics
            .adjust_gauge(ACTIVE_INVOCATIONS_GAUGE, 1);

        let span_name = match &command_name {
            Some(name) => format!("command {name}"),
            None => format!("event {}", event.kind.as_str()),
        };
        let mut span = TelemetrySpan::start_with_id(
            self.telemetry.trace.clone(),
            span_name.clone(),
            invocation.root_span_id.clone(),
            invocation.trace_id.clone(),
        );
        let mut transaction =
            ApmTransaction::start(self.telemetry.apm.clone(), span_name, TRANSACTION_TYPE);
        for (key, value) in [
            ("correlation_id", correlation_id.as_str()),
            ("actor_id", event.actor_id.as_str()),
            ("origin_id", event.origin_id.as_str()),
        ] {
            span.set_tag(key, value);
            transaction.set_label(key, value);
        }
        if let Some(name) = &command_name {
            span.set_tag("command", name.clone());
            transaction.set_label("command", name.clone());
        }

        let gate = ResponseGate::new(responder);
        let outcome = self
            .execute(&event, command_name.as_deref(), &invocation, &gate)
            .await;
        let duration_ms = invocation.elapsed_ms();

        // Metric tags stay low-cardinality: the command name and status only.
        let metric_command = command_name
            .clone()
            .unwrap_or_else(|| event.kind.as_str().to_string());
        let tags_for = |status: &str| vec![tag("command", metric_command.clone()), tag("status", status)];

        match &outcome {
            Ok(()) => {
                span.set_ok();
                transaction.set_outcome(TransactionOutcome::Success);
                self.telemetry
                    .metrics
                    .increment_counter(COMMANDS_EXECUTED_COUNTER, &tags_for("success"));
                self.telemetry.metrics.record_histogram(
                    COMMAND_DURATION_HISTOGRAM,
                    duration_ms,
                    &tags_for("success"),
                );
                tracing::debug!(
                    correlation_id = %correlation_id,
                    command = ?command_name,
                    duration_ms,
                    "invocation completed"
                );
                self.side_effects.enqueue_broadcast(CompletionEvent {
                    correlation_id: correlation_id.clone(),
                    kind: event.kind.as_str().to_string(),
                    command_name: command_name.clone(),
                    duration_ms,
                    completed_unix_ms: current_unix_timestamp_ms(),
                });
            }
            Err(error) => {
                let detail = error.to_string();
                if error.is_unhandled() {
                    span.record_exception(&detail);
                    tracing::error!(
                        correlation_id = %correlation_id,
                        command = ?command_name,
                        error = %detail,
                        "invocation failed with unhandled fault"
                    );
                } else {
                    span.set_error(detail.clone());
                    tracing::warn!(
                        correlation_id = %correlation_id,
                        command = ?command_name,
                        error = %detail,
                        "invocation failed"
                    );
                }
                transaction.capture_error(&detail);
                transaction.set_outcome(TransactionOutcome::Failure);
                self.telemetry
                    .metrics
                    .increment_counter(COMMANDS_EXECUTED_COUNTER, &tags_for("failure"));
                self.telemetry.metrics.record_histogram(
                    COMMAND_DURATION_HISTOGRAM,
                    duration_ms,
                    &tags_for("failure"),
                );
                if !gate.has_responded() {
                    if let Err(send_error) = gate.respond(&error.user_message()).await {
                        tracing::warn!(
                            correlation_id = %correlation_id,
                            error = %send_error,
                            "failed to deliver user-facing error message"
                        );
                    }
                }
            }
        }

        self.side_effects.enqueue_audit(AuditRecord {
            correlation_id: correlation_id.clone(),
            command_name,
            duration_ms,
            success: outcome.is_ok(),
            error_message: outcome.as_ref().err().map(ToString::to_string),
            completed_unix_ms: current_unix_timestamp_ms(),
        });

        span.finish();
        transaction.end();
        self.telemetry
            .metrics
            .adjust_gauge(ACTIVE_INVOCATIONS_GAUGE, -1);
    }

    async fn execute(
        &self,
        event: &GatewayEvent,
        command_name: Option<&str>,
        invocation: &Invocation,
        gate: &ResponseGate,
    ) -> Result<(), HandlerError> {
        let log_span = tracing::info_span!(
            "invocation",
            correlation_id = %invocation.correlation_id,
            kind = invocation.kind.as_str(),
            command = command_name.unwrap_or(""),
            actor_id = %invocation.actor_id,
            origin_id = %invocation.origin_id,
        );
        let run = async {
            match command_name {
                Some(name) => {
                    let handler =
                        self.modules
                            .resolve(name)
                            .ok_or_else(|| HandlerError::BadArguments {
                                detail: format!("unknown command '{name}'"),
                            })?;
                    contain_panics(handler.handle(event, gate)).await
                }
                None => {
                    for listener in self.modules.generic_listeners() {
                        contain_panics(listener.handle(event, gate)).await?;
                    }
                    Ok(())
                }
            }
        };
        invocation.clone().scope(run.instrument(log_span)).await
    }
}

/// Runs a handler future, converting a panic into an unhandled fault instead
/// of unwinding through the dispatcher.
async fn contain_panics<F>(future: F) -> Result<(), HandlerError>
where
    F: std::future::Future<Output = Result<(), HandlerError>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => Err(HandlerError::Unhandled(anyhow::anyhow!(
            "handler panicked: {}",
            panic_message(panic.as_ref())
        ))),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
