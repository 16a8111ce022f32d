//! Handler contract and the invocation failure taxonomy.

use async_trait::async_trait;
use thiserror::Error;

use crate::event::{GatewayEvent, ResponseGate};

/// A command (or generic-event) handler registered through a module.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, event: &GatewayEvent, responder: &ResponseGate) -> Result<(), HandlerError>;
}

/// Classified handler failures. Everything except `Unhandled` is an expected,
/// recoverable condition logged at warn level.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("precondition failed: {reason}")]
    PreconditionFailed { reason: String },
    #[error("bad arguments: {detail}")]
    BadArguments { detail: String },
    #[error("conversion failed: {detail}")]
    ConversionFailed { detail: String },
    #[error(transparent)]
    Unhandled(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn is_unhandled(&self) -> bool {
        matches!(self, Self::Unhandled(_))
    }

    /// The message shown to the person who triggered the invocation. Internal
    /// detail never leaks through this translation.
    pub fn user_message(&self) -> String {
        match self {
            Self::PreconditionFailed { reason } => reason.clone(),
            Self::BadArguments { .. } => "Invalid input for this command.".to_string(),
            Self::ConversionFailed { detail } => rewrite_conversion_detail(detail),
            Self::Unhandled(_) => "An error occurred while running this command.".to_string(),
        }
    }
}

/// The platform library reports an unresolvable referenced entity as
/// `failed to read <Entity> ...`, which reads like a syntax problem to the
/// person who typed the command. Rewrite that shape; anything else passes
/// through untouched.
fn rewrite_conversion_detail(detail: &str) -> String {
    const MISLEADING_PREFIX: &str = "failed to read ";
    let lowered = detail.to_ascii_lowercase();
    if let Some(position) = lowered.find(MISLEADING_PREFIX) {
        let entity = detail[position + MISLEADING_PREFIX.len()..]
            .split_whitespace()
            .next()
            .unwrap_or("")
            .trim_matches(|c: char| !c.is_ascii_alphanumeric())
            .to_ascii_lowercase();
        if !entity.is_empty() {
            return format!("Could not find the referenced {entity}. It may no longer exist.");
        }
    }
    detail.to_string()
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn unit_user_messages_translate_each_variant() {
        let precondition = HandlerError::PreconditionFailed {
            reason: "permission denied".to_string(),
        };
        assert_eq!(precondition.user_message(), "permission denied");

        let arguments = HandlerError::BadArguments {
            detail: "expected an integer".to_string(),
        };
        assert_eq!(arguments.user_message(), "Invalid input for this command.");

        let unhandled = HandlerError::Unhandled(anyhow!("database exploded"));
        assert_eq!(
            unhandled.user_message(),
            "An error occurred while running this command."
        );
        assert!(unhandled.is_unhandled());
    }

    #[test]
    fn unit_misleading_conversion_detail_is_rewritten() {
        let error = HandlerError::ConversionFailed {
            detail: "Failed to read User \"284123999123456789\"".to_string(),
        };
        assert_eq!(
            error.user_message(),
            "Could not find the referenced user. It may no longer exist."
        );
    }

    #[test]
    fn unit_ordinary_conversion_detail_passes_through() {
        let error = HandlerError::ConversionFailed {
            detail: "value out of range".to_string(),
        };
        assert_eq!(error.user_message(), "value out of range");
    }
}
