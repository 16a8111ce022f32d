//! Command dispatch core for Courier.
//!
//! Receives inbound gateway events, routes them to registered handler
//! modules, and fans completion telemetry out to metrics, traces, APM
//! transactions, structured logs, audit persistence, and live-update
//! broadcast, while guaranteeing that no handler fault ever escapes back to
//! the gateway connection.

pub mod dispatcher;
pub mod event;
pub mod handler;
pub mod registry;
pub mod side_effects;

pub use dispatcher::{
    Dispatcher, TelemetryFanout, ACTIVE_INVOCATIONS_GAUGE, COMMANDS_EXECUTED_COUNTER,
    COMMAND_DURATION_HISTOGRAM,
};
pub use event::{GatewayEvent, Responder, ResponseGate};
pub use handler::{CommandHandler, HandlerError};
pub use registry::{
    initialize, GatewayClient, HandlerModule, InitError, ModuleConfigEntry, ModuleConfigStore,
    RegisteredModule, RegisteredModuleSet,
};
pub use side_effects::{
    spawn_side_effect_worker, AuditRecord, AuditSink, CompletionBroadcaster, CompletionEvent,
    SideEffectQueue,
};
