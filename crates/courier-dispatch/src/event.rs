//! Inbound gateway events and the send-once response gate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use courier_telemetry::InvocationKind;

/// One event emitted by the gateway connection.
#[derive(Debug, Clone)]
pub struct GatewayEvent {
    pub kind: InvocationKind,
    /// Group prefix for grouped commands, absent for top-level ones.
    pub command_group: Option<String>,
    pub command_name: Option<String>,
    pub actor_id: String,
    /// Guild/channel identifier, or `"direct"` for direct messages.
    pub origin_id: String,
    pub payload: Value,
}

impl GatewayEvent {
    pub fn command(
        name: impl Into<String>,
        actor_id: impl Into<String>,
        origin_id: impl Into<String>,
    ) -> Self {
        Self {
            kind: InvocationKind::Command,
            command_group: None,
            command_name: Some(name.into()),
            actor_id: actor_id.into(),
            origin_id: origin_id.into(),
            payload: Value::Null,
        }
    }

    pub fn grouped_command(
        group: impl Into<String>,
        name: impl Into<String>,
        actor_id: impl Into<String>,
        origin_id: impl Into<String>,
    ) -> Self {
        let mut event = Self::command(name, actor_id, origin_id);
        event.command_group = Some(group.into());
        event
    }

    pub fn generic(actor_id: impl Into<String>, origin_id: impl Into<String>) -> Self {
        Self {
            kind: InvocationKind::GenericEvent,
            command_group: None,
            command_name: None,
            actor_id: actor_id.into(),
            origin_id: origin_id.into(),
            payload: Value::Null,
        }
    }

    /// The stable command name for this event, with the group prefix joined
    /// in (`"group subcommand"`). `None` for events without a command.
    pub fn full_command_name(&self) -> Option<String> {
        let name = self.command_name.as_deref().map(str::trim)?;
        if name.is_empty() {
            return None;
        }
        match self
            .command_group
            .as_deref()
            .map(str::trim)
            .filter(|group| !group.is_empty())
        {
            Some(group) => Some(format!("{group} {name}")),
            None => Some(name.to_string()),
        }
    }
}

/// The gateway's respond/follow-up operation for one event.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn send_followup(&self, text: &str) -> Result<()>;
}

/// Wraps a [`Responder`] and remembers whether anything was sent, so the
/// dispatcher can guarantee at most one outward error message per invocation.
pub struct ResponseGate {
    responder: Arc<dyn Responder>,
    responded: AtomicBool,
}

impl ResponseGate {
    pub fn new(responder: Arc<dyn Responder>) -> Self {
        Self {
            responder,
            responded: AtomicBool::new(false),
        }
    }

    /// Sends a user-visible message. A failed delivery still counts as a
    /// response attempt.
    pub async fn respond(&self, text: &str) -> Result<()> {
        self.responded.store(true, Ordering::SeqCst);
        self.responder.send_followup(text).await
    }

    pub fn has_responded(&self) -> bool {
        self.responded.load(Ordering::SeqCst)
    }
}
