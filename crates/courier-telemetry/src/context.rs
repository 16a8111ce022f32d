//! Per-invocation context carried across an async continuation chain.
//!
//! The context is bound with `tokio::task_local!` scoping: every future
//! awaited inside [`Invocation::scope`] observes the invocation, unrelated
//! concurrent invocations observe their own, and the slot is cleared
//! unconditionally when the scoped future completes by any path. A nested
//! scope shadows the outer invocation for the inner future's duration and
//! restores it afterwards.

use std::time::Instant;

use courier_core::{new_correlation_id, new_span_id, new_trace_id};

/// Classification of an inbound gateway event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationKind {
    Command,
    ComponentInteraction,
    ModalSubmit,
    GenericEvent,
}

impl InvocationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::ComponentInteraction => "component_interaction",
            Self::ModalSubmit => "modal_submit",
            Self::GenericEvent => "generic_event",
        }
    }

    /// True when events of this kind carry a command name.
    pub fn carries_command_name(self) -> bool {
        matches!(self, Self::Command | Self::ComponentInteraction)
    }
}

/// One inbound event being processed.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub correlation_id: String,
    pub kind: InvocationKind,
    pub command_name: Option<String>,
    pub actor_id: String,
    pub origin_id: String,
    pub trace_id: String,
    pub root_span_id: String,
    pub started_at: Instant,
}

tokio::task_local! {
    static CURRENT_INVOCATION: Invocation;
}

impl Invocation {
    /// Creates an invocation with fresh correlation, trace, and root-span ids.
    pub fn new(
        kind: InvocationKind,
        command_name: Option<String>,
        actor_id: impl Into<String>,
        origin_id: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: new_correlation_id(),
            kind,
            command_name,
            actor_id: actor_id.into(),
            origin_id: origin_id.into(),
            trace_id: new_trace_id(),
            root_span_id: new_span_id(),
            started_at: Instant::now(),
        }
    }

    /// Runs `future` with this invocation bound as the current context.
    pub async fn scope<F>(self, future: F) -> F::Output
    where
        F: std::future::Future,
    {
        CURRENT_INVOCATION.scope(self, future).await
    }

    /// Returns a clone of the invocation bound to the current async chain, or
    /// `None` outside any invocation scope.
    pub fn current() -> Option<Invocation> {
        CURRENT_INVOCATION.try_with(Clone::clone).ok()
    }

    /// Milliseconds elapsed since the invocation was created.
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(kind: InvocationKind, command: Option<&str>) -> Invocation {
        Invocation::new(kind, command.map(str::to_string), "actor-1", "origin-1")
    }

    #[tokio::test]
    async fn context_is_visible_inside_scope_and_cleared_after() {
        assert!(Invocation::current().is_none());

        let invocation = sample(InvocationKind::Command, Some("ping"));
        let correlation_id = invocation.correlation_id.clone();
        invocation
            .scope(async move {
                let current = Invocation::current().expect("context inside scope");
                assert_eq!(current.correlation_id, correlation_id);
                assert_eq!(current.command_name.as_deref(), Some("ping"));

                // Still visible after a suspension point.
                tokio::task::yield_now().await;
                assert!(Invocation::current().is_some());
            })
            .await;

        assert!(Invocation::current().is_none());
    }

    #[tokio::test]
    async fn concurrent_invocations_observe_only_their_own_context() {
        let mut handles = Vec::new();
        for index in 0..8 {
            handles.push(tokio::spawn(async move {
                let command = format!("cmd-{index}");
                let invocation = sample(InvocationKind::Command, Some(command.as_str()));
                let expected = invocation.correlation_id.clone();
                invocation
                    .scope(async move {
                        tokio::task::yield_now().await;
                        let current = Invocation::current().expect("own context");
                        assert_eq!(current.correlation_id, expected);
                        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
                        let current = Invocation::current().expect("own context after sleep");
                        assert_eq!(current.correlation_id, expected);
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.expect("task should not panic");
        }
    }

    #[tokio::test]
    async fn nested_scope_shadows_and_restores_the_outer_context() {
        let outer = sample(InvocationKind::Command, Some("outer"));
        let outer_id = outer.correlation_id.clone();
        outer
            .scope(async move {
                let inner = sample(InvocationKind::GenericEvent, None);
                let inner_id = inner.correlation_id.clone();
                inner
                    .scope(async move {
                        let current = Invocation::current().expect("inner context");
                        assert_eq!(current.correlation_id, inner_id);
                    })
                    .await;
                let current = Invocation::current().expect("outer restored");
                assert_eq!(current.correlation_id, outer_id);
            })
            .await;
    }

    #[tokio::test]
    async fn context_is_cleared_even_when_the_scoped_future_panics() {
        let invocation = sample(InvocationKind::Command, Some("boom"));
        let result = tokio::spawn(async move {
            invocation
                .scope(async {
                    panic!("forced invocation panic");
                })
                .await
        })
        .await;
        assert!(result.is_err());
        assert!(Invocation::current().is_none());
    }
}
