//! End-to-end pipeline: gateway event through the dispatcher into a handler
//! that calls the platform API over real HTTP, with retries and telemetry
//! observed across both crates.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use httpmock::prelude::*;
use serde_json::json;
use tokio::sync::watch;

use courier_api::{ApiClient, ApiClientConfig, ApiRequest, PLATFORM_API_CLIENT_NAME};
use courier_dispatch::{
    initialize, spawn_side_effect_worker, AuditRecord, AuditSink, CommandHandler,
    CompletionBroadcaster, CompletionEvent, Dispatcher, GatewayClient, GatewayEvent,
    HandlerError, HandlerModule, ModuleConfigEntry, ModuleConfigStore, RegisteredModule,
    Responder, ResponseGate, TelemetryFanout, COMMANDS_EXECUTED_COUNTER,
};
use courier_telemetry::{
    tag, InMemoryApmSink, InMemoryLatencyTracker, InMemoryMetricsSink, InMemoryTraceSink,
    SpanStatus,
};

struct AllEnabledConfig;

#[async_trait]
impl ModuleConfigStore for AllEnabledConfig {
    async fn all_modules(&self) -> anyhow::Result<Vec<ModuleConfigEntry>> {
        Ok(Vec::new())
    }
}

struct NoopGateway;

impl GatewayClient for NoopGateway {
    fn bind_modules(&self, _modules: &[RegisteredModule]) -> anyhow::Result<()> {
        Ok(())
    }
}

struct RecordingResponder {
    messages: Mutex<Vec<String>>,
}

impl RecordingResponder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(Vec::new()),
        })
    }

    fn messages(&self) -> Vec<String> {
        self.messages.lock().expect("responder lock").clone()
    }
}

#[async_trait]
impl Responder for RecordingResponder {
    async fn send_followup(&self, text: &str) -> anyhow::Result<()> {
        self.messages
            .lock()
            .expect("responder lock")
            .push(text.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingAudit {
    records: Mutex<Vec<AuditRecord>>,
}

impl RecordingAudit {
    fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().expect("audit lock").clone()
    }
}

#[async_trait]
impl AuditSink for RecordingAudit {
    async fn log_invocation(&self, record: AuditRecord) -> anyhow::Result<()> {
        self.records.lock().expect("audit lock").push(record);
        Ok(())
    }
}

#[derive(Default)]
struct NoopBroadcaster;

#[async_trait]
impl CompletionBroadcaster for NoopBroadcaster {
    async fn broadcast(&self, _event: CompletionEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Posts an announcement message to a fixed channel via the platform API.
struct AnnounceHandler {
    client: ApiClient,
    channel_path: String,
}

#[async_trait]
impl CommandHandler for AnnounceHandler {
    async fn handle(
        &self,
        _event: &GatewayEvent,
        responder: &ResponseGate,
    ) -> Result<(), HandlerError> {
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let request = ApiRequest::post(&self.channel_path).json(&json!({"content": "hello"}));
        let response = self
            .client
            .send(&request, cancel_rx)
            .await
            .map_err(|error| HandlerError::Unhandled(anyhow!(error)))?;
        if response.status.as_u16() == 403 {
            return Err(HandlerError::PreconditionFailed {
                reason: "permission denied".to_string(),
            });
        }
        if !response.is_success() {
            return Err(HandlerError::Unhandled(anyhow!(
                "announcement failed with status {}",
                response.status.as_u16()
            )));
        }
        responder
            .respond("announced")
            .await
            .map_err(HandlerError::Unhandled)?;
        Ok(())
    }
}

struct AnnounceModule {
    handler: Arc<AnnounceHandler>,
}

impl HandlerModule for AnnounceModule {
    fn name(&self) -> &'static str {
        "announce"
    }

    fn commands(&self) -> Vec<(String, Arc<dyn CommandHandler>)> {
        vec![("announce".to_string(), self.handler.clone())]
    }
}

struct Pipeline {
    dispatcher: Dispatcher,
    metrics: Arc<InMemoryMetricsSink>,
    trace: Arc<InMemoryTraceSink>,
    apm: Arc<InMemoryApmSink>,
    latency: Arc<InMemoryLatencyTracker>,
    audit: Arc<RecordingAudit>,
}

async fn pipeline(api_base: String, channel_path: &str) -> Pipeline {
    courier_telemetry::install_tracing_subscriber();
    let metrics = Arc::new(InMemoryMetricsSink::default());
    let trace = Arc::new(InMemoryTraceSink::default());
    let apm = Arc::new(InMemoryApmSink::default());
    let latency = Arc::new(InMemoryLatencyTracker::default());
    let audit = Arc::new(RecordingAudit::default());

    let client = ApiClient::new(
        ApiClientConfig {
            api_base,
            ..ApiClientConfig::default()
        },
        trace.clone(),
        latency.clone(),
    )
    .expect("api client should be created");

    let module: Arc<dyn HandlerModule> = Arc::new(AnnounceModule {
        handler: Arc::new(AnnounceHandler {
            client,
            channel_path: channel_path.to_string(),
        }),
    });
    let set = initialize(vec![module], &AllEnabledConfig, &NoopGateway)
        .await
        .expect("module initialization should succeed");

    let (queue, _worker) = spawn_side_effect_worker(audit.clone(), Arc::new(NoopBroadcaster));
    let dispatcher = Dispatcher::new(
        set,
        TelemetryFanout {
            metrics: metrics.clone(),
            trace: trace.clone(),
            apm: apm.clone(),
        },
        queue,
    );
    Pipeline {
        dispatcher,
        metrics,
        trace,
        apm,
        latency,
        audit,
    }
}

async fn wait_until(condition: impl Fn() -> bool, label: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {label}");
}

const CHANNEL_PATH: &str = "/v10/channels/123456789012345678/messages";

#[tokio::test]
async fn command_invocation_retries_the_api_call_and_joins_telemetry() {
    let server = MockServer::start();
    let throttled = server.mock(|when, then| {
        when.method(POST)
            .path(CHANNEL_PATH)
            .header("x-courier-retry-attempt", "0");
        then.status(429).header("X-RateLimit-Reset-After", "0.05");
    });
    let accepted = server.mock(|when, then| {
        when.method(POST)
            .path(CHANNEL_PATH)
            .header("x-courier-retry-attempt", "1");
        then.status(200).json_body(json!({"id": "42"}));
    });

    let pipeline = pipeline(server.base_url(), CHANNEL_PATH).await;
    let responder = RecordingResponder::new();
    pipeline
        .dispatcher
        .dispatch(
            GatewayEvent::command("announce", "actor-1", "guild-1"),
            responder.clone(),
        )
        .await;

    throttled.assert();
    accepted.assert();
    assert_eq!(responder.messages(), vec!["announced".to_string()]);

    // The handler's API span nests under the invocation's root span.
    let command_spans = pipeline.trace.spans_named("command announce");
    assert_eq!(command_spans.len(), 1);
    assert_eq!(command_spans[0].status, SpanStatus::Ok);
    let api_spans = pipeline.trace.spans_named("api POST /channels/{id}/messages");
    assert_eq!(api_spans.len(), 1);
    assert_eq!(api_spans[0].trace_id, command_spans[0].trace_id);
    assert_eq!(
        api_spans[0].parent_id.as_deref(),
        Some(command_spans[0].id.as_str())
    );
    assert_eq!(api_spans[0].attribute("retry.count"), Some("1"));
    assert_eq!(pipeline.trace.spans_named("api retry").len(), 1);

    let success_tags = [tag("command", "announce"), tag("status", "success")];
    assert_eq!(
        pipeline
            .metrics
            .counter_value(COMMANDS_EXECUTED_COUNTER, &success_tags),
        1
    );
    assert_eq!(
        pipeline.latency.samples_for(PLATFORM_API_CLIENT_NAME).len(),
        1
    );
    assert_eq!(pipeline.apm.finished_transactions().len(), 1);

    let audit = pipeline.audit.clone();
    wait_until(|| !audit.records().is_empty(), "audit record").await;
    let records = pipeline.audit.records();
    assert!(records[0].success);
    assert_eq!(records[0].command_name.as_deref(), Some("announce"));
}

#[tokio::test]
async fn forbidden_api_response_surfaces_as_a_translated_user_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path(CHANNEL_PATH);
        then.status(403)
            .json_body(json!({"code": 50013, "message": "Missing Permissions"}));
    });

    let pipeline = pipeline(server.base_url(), CHANNEL_PATH).await;
    let responder = RecordingResponder::new();
    pipeline
        .dispatcher
        .dispatch(
            GatewayEvent::command("announce", "actor-1", "guild-1"),
            responder.clone(),
        )
        .await;

    assert_eq!(responder.messages(), vec!["permission denied".to_string()]);

    let command_spans = pipeline.trace.spans_named("command announce");
    assert_eq!(command_spans[0].status, SpanStatus::Error);
    let api_spans = pipeline.trace.spans_named("api POST /channels/{id}/messages");
    assert_eq!(api_spans[0].status, SpanStatus::Error);
    assert_eq!(
        api_spans[0].error_detail.as_deref(),
        Some("Missing Permissions")
    );

    let failure_tags = [tag("command", "announce"), tag("status", "failure")];
    assert_eq!(
        pipeline
            .metrics
            .counter_value(COMMANDS_EXECUTED_COUNTER, &failure_tags),
        1
    );

    let audit = pipeline.audit.clone();
    wait_until(|| !audit.records().is_empty(), "audit record").await;
    assert!(!pipeline.audit.records()[0].success);
}
