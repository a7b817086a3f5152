//! `retrievalAugmentedGeneration`: tell the model which wiki workspaces it can
//! search and how to call the search tool.
//!
//! Search results are never injected here. The model asks for them with a
//! tool call, picked up by the continue-round pipeline.

use std::sync::Arc;

use async_trait::async_trait;

use super::{ModificationContext, ModificationHandler, modification_node};
use crate::agent::{
    Position, PositionParameter, PromptDynamicModification, RetrievalAugmentedGenerationParam,
};
use crate::error::Result;
use crate::services::{AgentDefinitionService, AvailableTool, Workspace, WorkspaceService};
use crate::tools::WIKI_SEARCH_TOOL_ID;
use crate::tree::{PromptTree, insert_at_position};
use crate::trigger::TriggerEvaluator;
use crate::types::last_user_message_text;

/// Tag marking an injected tool list.
pub const TOOL_LIST_TAG: &str = "toolList";
const RAG_TAG: &str = "retrievalAugmentedGeneration";

/// Injects the list of wiki workspaces and the wiki search tool so the model
/// can query the wiki itself.
///
/// Tool results are never injected here; they reach the model through the
/// message history.
pub struct RetrievalAugmentedGenerationHandler {
    workspaces: Arc<dyn WorkspaceService>,
    agent_definitions: Arc<dyn AgentDefinitionService>,
    trigger: TriggerEvaluator,
}

impl RetrievalAugmentedGenerationHandler {
    pub fn new(
        workspaces: Arc<dyn WorkspaceService>,
        agent_definitions: Arc<dyn AgentDefinitionService>,
        trigger: TriggerEvaluator,
    ) -> Self {
        Self {
            workspaces,
            agent_definitions,
            trigger,
        }
    }

    async fn build_tool_list(&self, param: &RetrievalAugmentedGenerationParam) -> Result<String> {
        let workspaces: Vec<Workspace> = self
            .workspaces
            .get_workspaces_as_list()
            .await?
            .into_iter()
            .filter(|w| w.is_wiki_workspace())
            .collect();

        // A named workspace narrows the list when it exists.
        let preferred: Vec<&Workspace> = match &param.wiki_param {
            Some(wiki) => workspaces
                .iter()
                .filter(|w| w.name == wiki.workspace_name || w.id == wiki.workspace_name)
                .collect(),
            None => Vec::new(),
        };
        let listed: Vec<&Workspace> = if preferred.is_empty() {
            workspaces.iter().collect()
        } else {
            preferred
        };

        let tools = self.agent_definitions.get_available_tools().await?;
        let wiki_search = tools.iter().find(|t| t.id == WIKI_SEARCH_TOOL_ID);

        Ok(render_tool_list(&listed, wiki_search))
    }
}

impl std::fmt::Debug for RetrievalAugmentedGenerationHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalAugmentedGenerationHandler")
            .field("trigger", &self.trigger)
            .finish_non_exhaustive()
    }
}

fn render_tool_list(workspaces: &[&Workspace], tool: Option<&AvailableTool>) -> String {
    let mut out = String::from("Available wiki workspaces:\n");
    if workspaces.is_empty() {
        out.push_str("No wiki workspaces available.\n");
    }
    for workspace in workspaces {
        out.push_str(&format!("- {} (ID: {})\n", workspace.name, workspace.id));
    }

    if let Some(tool) = tool {
        out.push_str("\nAvailable tools:\n");
        out.push_str(&format!("Tool ID: {}\n", tool.id));
        out.push_str(&format!("Tool Name: {}\n", tool.name));
        out.push_str(&format!("Description: {}\n", tool.description));
        out.push_str("Parameters:\n");
        out.push_str(&tool.schema.parameters);
        out.push('\n');
    }
    out
}

#[async_trait]
impl ModificationHandler for RetrievalAugmentedGenerationHandler {
    async fn apply(
        &self,
        tree: &PromptTree,
        modification: &PromptDynamicModification,
        ctx: &ModificationContext,
    ) -> Result<()> {
        let Some(param) = &modification.retrieval_augmented_generation_param else {
            tracing::debug!(
                id = %modification.id,
                "retrievalAugmentedGeneration without param, skipping"
            );
            return Ok(());
        };

        let user_text = last_user_message_text(ctx.messages());
        if !self
            .trigger
            .should_trigger(param.trigger.as_ref(), user_text)
            .await
        {
            tracing::debug!(id = %modification.id, "RAG trigger not satisfied");
            return Ok(());
        }

        let Some(position) = &param.tool_list_position else {
            tracing::debug!(id = %modification.id, "No toolListPosition, nothing to inject");
            return Ok(());
        };

        if !tree.contains(&position.target_id) {
            tracing::warn!(
                id = %modification.id,
                target_id = %position.target_id,
                "Tool list target not found"
            );
            return Ok(());
        }

        let content = match self.build_tool_list(param).await {
            Ok(content) => content,
            Err(e) => {
                tracing::error!(id = %modification.id, error = %e, "Failed to build tool list");
                return Ok(());
            }
        };

        let node = modification_node(&modification.id, modification.source_path(), content)
            .with_caption("Wiki tools")
            .with_tag(TOOL_LIST_TAG)
            .with_tag(RAG_TAG);

        // Only sibling placement is meaningful for a tool list.
        let placement = match position.position {
            Position::Before => PositionParameter::before(&position.target_id),
            _ => PositionParameter::after(&position.target_id),
        };
        tree.update(|roots| insert_at_position(roots, &placement, node));

        tracing::debug!(id = %modification.id, "Tool list injected");
        Ok(())
    }
}
