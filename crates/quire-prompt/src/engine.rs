//! The prompt engine.
//!
//! Drives one agent turn:
//!
//! ```text
//! prompt_concat ──▶ clone prompts ──▶ modifications (in order) ──▶ flatten
//!                                                                     │
//!      model call (caller) ◀── + current user message ◀───────────────┘
//!             │
//! response_concat ◀── llm response ──▶ continue_round ──▶ { continue, reason }
//! ```

use std::sync::Arc;

use crate::agent::{AgentPromptDescription, Response};
use crate::continue_round::{
    AgentHandlerContext, ContinueRoundHandlerConfig, ContinueRoundRegistry, ContinueRoundResult,
    process_continue_round,
};
use crate::handlers::{DeferredTasks, HandlerDeps, ModificationContext, ModificationRegistry};
use crate::response::{ResponseModificationRegistry, apply_response_modifications};
use crate::services::{WikiService, WorkspaceService};
use crate::tool_calling::{
    TOOL_CALLING_HANDLER_ID, TOOL_CALLING_HANDLER_PRIORITY, ToolCallingHandler,
};
use crate::tools::ToolRegistry;
use crate::tree::PromptTree;
use crate::types::{AgentInstanceMessage, FlatPrompt};

/// Result of [`PromptEngine::prompt_concat`].
#[derive(Debug)]
pub struct PromptConcatOutput {
    /// Messages for the model call.
    pub flat_prompts: Vec<FlatPrompt>,
    /// The modified tree. Deferred handlers may still be writing to it.
    pub processed_prompts: PromptTree,
    /// Background tasks spawned by deferred handlers.
    pub deferred: DeferredTasks,
}

/// Prompt assembly and response evaluation for agents.
#[derive(Debug, Clone)]
pub struct PromptEngine {
    modifications: Arc<ModificationRegistry>,
    responses: Arc<ResponseModificationRegistry>,
    continue_rounds: Arc<ContinueRoundRegistry>,
}

impl PromptEngine {
    /// Engine with every built-in handler, the tool-calling continue-round
    /// handler validating against `tools`.
    pub fn new(deps: &HandlerDeps, tools: Arc<ToolRegistry>) -> Self {
        let continue_rounds = ContinueRoundRegistry::new();
        continue_rounds.register(ContinueRoundHandlerConfig::new(
            TOOL_CALLING_HANDLER_ID,
            Arc::new(ToolCallingHandler::new(tools)),
            TOOL_CALLING_HANDLER_PRIORITY,
        ));

        Self {
            modifications: Arc::new(ModificationRegistry::with_builtin_handlers(deps)),
            responses: Arc::new(ResponseModificationRegistry::with_builtin_handlers()),
            continue_rounds: Arc::new(continue_rounds),
        }
    }

    /// Engine over the wiki services, sharing one tool registry between the
    /// tool list and tool-call validation.
    pub fn from_services(
        workspaces: Arc<dyn WorkspaceService>,
        wiki: Arc<dyn WikiService>,
    ) -> Self {
        let tools = Arc::new(ToolRegistry::with_builtin_tools(
            workspaces.clone(),
            wiki.clone(),
        ));
        let deps = HandlerDeps::new(workspaces, wiki).with_agent_definitions(tools.clone());
        Self::new(&deps, tools)
    }

    /// Engine over caller-supplied registries.
    pub fn from_registries(
        modifications: Arc<ModificationRegistry>,
        responses: Arc<ResponseModificationRegistry>,
        continue_rounds: Arc<ContinueRoundRegistry>,
    ) -> Self {
        Self {
            modifications,
            responses,
            continue_rounds,
        }
    }

    pub fn modifications(&self) -> &ModificationRegistry {
        &self.modifications
    }

    pub fn responses(&self) -> &ResponseModificationRegistry {
        &self.responses
    }

    pub fn continue_rounds(&self) -> &ContinueRoundRegistry {
        &self.continue_rounds
    }

    /// Build the model input for one turn.
    ///
    /// `messages[0]` is the current message; when it is a user message it is
    /// appended after the flattened tree. Missing handlers and handler errors
    /// are logged and skipped.
    pub async fn prompt_concat(
        &self,
        agent: &AgentPromptDescription,
        messages: &[AgentInstanceMessage],
    ) -> PromptConcatOutput {
        let config = &agent.prompt_config;
        let message_id = messages.first().map(|m| m.id.as_str()).unwrap_or_default();
        tracing::debug!(
            agent_id = %agent.id,
            message_id,
            modifications = config.prompt_dynamic_modification.len(),
            "Concatenating prompts"
        );

        let tree = PromptTree::new(config.prompts.clone());
        let ctx = ModificationContext::new(messages.to_vec());

        for modification in &config.prompt_dynamic_modification {
            let kind = modification.dynamic_modification_type;
            let Some(handler) = self.modifications.get(kind) else {
                tracing::warn!(
                    id = %modification.id,
                    kind = %kind,
                    "No modification handler registered"
                );
                continue;
            };
            if let Err(e) = handler.apply(&tree, modification, &ctx).await {
                tracing::error!(
                    id = %modification.id,
                    kind = %kind,
                    error = %e,
                    "Prompt modification failed"
                );
            }
        }

        let mut flat_prompts = tree.flatten();
        if let Some(current) = messages.first().filter(|m| m.is_user()) {
            flat_prompts.push(FlatPrompt::user(current.content.clone()));
        }

        let deferred = ctx.take_deferred();
        tracing::debug!(
            agent_id = %agent.id,
            messages = flat_prompts.len(),
            deferred = deferred.len(),
            "Prompts concatenated"
        );

        PromptConcatOutput {
            flat_prompts,
            processed_prompts: tree,
            deferred,
        }
    }

    /// Fill the agent's response placeholders from the model output.
    pub async fn response_concat(
        &self,
        agent: &AgentPromptDescription,
        llm_response: &str,
    ) -> Vec<Response> {
        let config = &agent.prompt_config;
        apply_response_modifications(
            &self.responses,
            &config.response,
            &config.response_dynamic_modification,
            llm_response,
        )
        .await
    }

    /// Decide whether the agent should run another round.
    pub async fn continue_round(
        &self,
        agent: &AgentPromptDescription,
        llm_response: &str,
        ctx: &AgentHandlerContext,
    ) -> ContinueRoundResult {
        process_continue_round(&self.continue_rounds, agent, llm_response, ctx).await
    }
}
