//! Continue-round handlers.
//!
//! After each model answer, registered handlers vote on whether the agent
//! should run another generation round. Handlers run in ascending priority
//! order and the first vote to continue wins:
//!
//! ```text
//! llm response ─▶ handler (priority 10) ─▶ handler (priority 20) ─▶ ... ─▶ stop
//!                      │                        │
//!                      └── continue ────────────┴──▶ return immediately
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::AgentPromptDescription;
use crate::error::Result;
use crate::types::AgentInstanceMessage;

/// Reason given when no handler votes to continue.
pub const NO_CONTINUATION_REASON: &str = "No handlers triggered continuation";

// ============================================================================
// Types
// ============================================================================

/// A handler's vote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueRoundResult {
    #[serde(rename = "continue")]
    pub continue_round: bool,
    /// Message to feed into the next round, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ContinueRoundResult {
    /// Vote to end the conversation turn.
    pub fn stop(reason: impl Into<String>) -> Self {
        Self {
            continue_round: false,
            new_message: None,
            reason: Some(reason.into()),
        }
    }

    /// Vote for another round.
    pub fn proceed(reason: impl Into<String>) -> Self {
        Self {
            continue_round: true,
            new_message: None,
            reason: Some(reason.into()),
        }
    }

    pub fn with_new_message(mut self, message: impl Into<String>) -> Self {
        self.new_message = Some(message.into());
        self
    }
}

/// What a handler may inspect besides the response text.
#[derive(Debug, Clone)]
pub struct AgentHandlerContext {
    pub agent_id: String,
    pub messages: Vec<AgentInstanceMessage>,
    cancelled: Arc<AtomicBool>,
}

impl AgentHandlerContext {
    pub fn new(agent_id: impl Into<String>, messages: Vec<AgentInstanceMessage>) -> Self {
        Self {
            agent_id: agent_id.into(),
            messages,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share a cancellation flag owned by the caller.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = flag;
        self
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
pub trait ContinueRoundHandler: Send + Sync {
    async fn handle(
        &self,
        agent: &AgentPromptDescription,
        llm_response: &str,
        ctx: &AgentHandlerContext,
    ) -> Result<ContinueRoundResult>;
}

/// A registered handler.
#[derive(Clone)]
pub struct ContinueRoundHandlerConfig {
    pub id: String,
    pub handler: Arc<dyn ContinueRoundHandler>,
    /// Lower runs earlier.
    pub priority: i32,
    pub enabled: bool,
}

impl ContinueRoundHandlerConfig {
    pub fn new(
        id: impl Into<String>,
        handler: Arc<dyn ContinueRoundHandler>,
        priority: i32,
    ) -> Self {
        Self {
            id: id.into(),
            handler,
            priority,
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl std::fmt::Debug for ContinueRoundHandlerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContinueRoundHandlerConfig")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .finish()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Handlers sorted by ascending priority, at most one per id.
#[derive(Debug, Default)]
pub struct ContinueRoundRegistry {
    handlers: RwLock<Vec<ContinueRoundHandlerConfig>>,
}

impl ContinueRoundRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `config`, replacing any handler with the same id.
    ///
    /// Handlers with equal priority keep their registration order.
    pub fn register(&self, config: ContinueRoundHandlerConfig) {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        handlers.retain(|h| h.id != config.id);
        tracing::debug!(
            id = %config.id,
            priority = config.priority,
            "Registered continue-round handler"
        );
        handlers.push(config);
        handlers.sort_by_key(|h| h.priority);
    }

    /// Remove the handler with `id`; returns whether one was removed.
    pub fn unregister(&self, id: &str) -> bool {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|h| h.id != id);
        handlers.len() != before
    }

    /// Copy of the registered handlers in execution order.
    pub fn get_handlers(&self) -> Vec<ContinueRoundHandlerConfig> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Ask the enabled handlers in order whether to run another round.
///
/// A failing handler is logged and skipped. Never returns an error.
pub async fn process_continue_round(
    registry: &ContinueRoundRegistry,
    agent: &AgentPromptDescription,
    llm_response: &str,
    ctx: &AgentHandlerContext,
) -> ContinueRoundResult {
    for config in registry.get_handlers().into_iter().filter(|h| h.enabled) {
        if ctx.is_cancelled() {
            tracing::debug!(agent_id = %ctx.agent_id, "Agent cancelled, not continuing");
            return ContinueRoundResult::stop("Agent cancelled");
        }

        match config.handler.handle(agent, llm_response, ctx).await {
            Ok(result) if result.continue_round => {
                tracing::debug!(
                    handler = %config.id,
                    reason = result.reason.as_deref().unwrap_or(""),
                    "Handler voted to continue"
                );
                return result;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(handler = %config.id, error = %e, "Continue-round handler failed");
            }
        }
    }

    ContinueRoundResult::stop(NO_CONTINUATION_REASON)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PromptError;
    use std::sync::atomic::AtomicUsize;

    struct Vote {
        continue_round: bool,
        calls: AtomicUsize,
    }

    impl Vote {
        fn new(continue_round: bool) -> Arc<Self> {
            Arc::new(Self {
                continue_round,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ContinueRoundHandler for Vote {
        async fn handle(
            &self,
            _agent: &AgentPromptDescription,
            _llm_response: &str,
            _ctx: &AgentHandlerContext,
        ) -> Result<ContinueRoundResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(if self.continue_round {
                ContinueRoundResult::proceed("voted yes")
            } else {
                ContinueRoundResult::stop("voted no")
            })
        }
    }

    struct Failing;

    #[async_trait]
    impl ContinueRoundHandler for Failing {
        async fn handle(
            &self,
            _agent: &AgentPromptDescription,
            _llm_response: &str,
            _ctx: &AgentHandlerContext,
        ) -> Result<ContinueRoundResult> {
            Err(PromptError::Internal("exploded".into()))
        }
    }

    async fn run(registry: &ContinueRoundRegistry) -> ContinueRoundResult {
        process_continue_round(
            registry,
            &AgentPromptDescription::new("agent"),
            "response",
            &AgentHandlerContext::new("agent", vec![]),
        )
        .await
    }

    #[tokio::test]
    async fn test_short_circuit_on_first_continue() {
        let registry = ContinueRoundRegistry::new();
        let first = Vote::new(false);
        let second = Vote::new(true);
        let third = Vote::new(true);
        registry.register(ContinueRoundHandlerConfig::new("third", third.clone(), 30));
        registry.register(ContinueRoundHandlerConfig::new("first", first.clone(), 10));
        registry.register(ContinueRoundHandlerConfig::new("second", second.clone(), 20));

        let result = run(&registry).await;
        assert!(result.continue_round);
        assert_eq!(result.reason.as_deref(), Some("voted yes"));
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
        assert_eq!(third.calls(), 0);
    }

    #[tokio::test]
    async fn test_no_votes_gives_default_reason() {
        let registry = ContinueRoundRegistry::new();
        assert_eq!(run(&registry).await.reason.as_deref(), Some(NO_CONTINUATION_REASON));

        registry.register(ContinueRoundHandlerConfig::new("no", Vote::new(false), 1));
        let result = run(&registry).await;
        assert!(!result.continue_round);
        assert_eq!(result.reason.as_deref(), Some(NO_CONTINUATION_REASON));
    }

    #[tokio::test]
    async fn test_failing_and_disabled_handlers_are_skipped() {
        let registry = ContinueRoundRegistry::new();
        let disabled = Vote::new(true);
        registry.register(ContinueRoundHandlerConfig::new("boom", Arc::new(Failing), 1));
        registry.register(ContinueRoundHandlerConfig::new("off", disabled.clone(), 2).disabled());
        registry.register(ContinueRoundHandlerConfig::new("yes", Vote::new(true), 3));

        assert!(run(&registry).await.continue_round);
        assert_eq!(disabled.calls(), 0);
    }

    #[test]
    fn test_register_replaces_by_id_and_keeps_order() {
        let registry = ContinueRoundRegistry::new();
        registry.register(ContinueRoundHandlerConfig::new("a", Vote::new(false), 50));
        registry.register(ContinueRoundHandlerConfig::new("b", Vote::new(false), 10));
        registry.register(ContinueRoundHandlerConfig::new("c", Vote::new(false), 10));
        registry.register(ContinueRoundHandlerConfig::new("a", Vote::new(false), 5));

        let ids: Vec<String> = registry.get_handlers().into_iter().map(|h| h.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        assert!(registry.unregister("b"));
        assert!(!registry.unregister("b"));
        assert_eq!(registry.get_handlers().len(), 2);

        registry.clear();
        assert!(registry.get_handlers().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_context_stops() {
        let registry = ContinueRoundRegistry::new();
        let vote = Vote::new(true);
        registry.register(ContinueRoundHandlerConfig::new("yes", vote.clone(), 1));

        let ctx = AgentHandlerContext::new("agent", vec![]);
        ctx.cancel();
        let result =
            process_continue_round(&registry, &AgentPromptDescription::new("agent"), "r", &ctx)
                .await;
        assert!(!result.continue_round);
        assert_eq!(vote.calls(), 0);
    }

    #[test]
    fn test_result_serializes_continue_key() {
        let json = serde_json::to_value(ContinueRoundResult::proceed("x").with_new_message("next"))
            .unwrap();
        assert_eq!(json["continue"], true);
        assert_eq!(json["newMessage"], "next");
    }
}
