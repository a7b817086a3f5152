//! `fullReplacement`: replace a target prompt's content.
//!
//! In the prompt phase the only source is the session history, rendered as
//! one child node per visible message.

use async_trait::async_trait;

use super::{ModificationContext, ModificationHandler};
use crate::agent::{FullReplacementSource, PromptDynamicModification};
use crate::duration::filter_messages_by_duration;
use crate::error::Result;
use crate::tree::{PromptTree, locate_prompt_mut};
use crate::types::{AgentInstanceMessage, PromptNode, last_user_message_index};

/// Target text when no history survives filtering.
pub const NO_HISTORY_TEXT: &str = "No previous chat history.";

/// Replaces a target node's content with the conversation history.
///
/// The most recent user message is left out since it is sent separately as
/// the current turn.
#[derive(Debug, Default, Clone, Copy)]
pub struct FullReplacementHandler;

#[async_trait]
impl ModificationHandler for FullReplacementHandler {
    async fn apply(
        &self,
        tree: &PromptTree,
        modification: &PromptDynamicModification,
        ctx: &ModificationContext,
    ) -> Result<()> {
        let Some(param) = &modification.full_replacement_param else {
            tracing::debug!(id = %modification.id, "fullReplacement without param, skipping");
            return Ok(());
        };

        if param.source_type == FullReplacementSource::LlmResponse {
            tracing::debug!(
                id = %modification.id,
                "llmResponse replacement applies to responses, skipping in prompt phase"
            );
            return Ok(());
        }

        let history = history_without_current(ctx.messages());
        let visible = filter_messages_by_duration(&history);
        let source = modification.source_path();

        let replaced = tree.update(|roots| {
            let Some(mut slot) = locate_prompt_mut(roots, &param.target_id) else {
                return false;
            };
            let target = slot.node_mut();
            if visible.is_empty() {
                target.text = Some(NO_HISTORY_TEXT.to_string());
            } else {
                target.text = None;
                target.children = visible
                    .iter()
                    .enumerate()
                    .map(|(index, message)| history_node(index, message, source.clone()))
                    .collect();
            }
            true
        });

        if replaced {
            tracing::debug!(
                target_id = %param.target_id,
                messages = visible.len(),
                "History injected"
            );
        } else {
            tracing::warn!(
                id = %modification.id,
                target_id = %param.target_id,
                "fullReplacement target not found"
            );
        }
        Ok(())
    }
}

/// History with the most recent user message removed.
fn history_without_current(messages: &[AgentInstanceMessage]) -> Vec<AgentInstanceMessage> {
    let mut history = messages.to_vec();
    if let Some(index) = last_user_message_index(&history) {
        history.remove(index);
    }
    history
}

fn history_node(index: usize, message: &AgentInstanceMessage, source: Vec<String>) -> PromptNode {
    PromptNode::leaf(format!("history-{}", index), message.content.clone())
        .with_role(message.role.normalize())
        .with_source(source)
}
