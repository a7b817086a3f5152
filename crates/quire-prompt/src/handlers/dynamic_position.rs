//! `dynamicPosition`: splice a fixed snippet relative to a target prompt.

use async_trait::async_trait;

use super::{ModificationContext, ModificationHandler, modification_node};
use crate::agent::PromptDynamicModification;
use crate::error::Result;
use crate::tree::{PromptTree, insert_at_position};

/// Inserts the modification's `content` at a position relative to a target.
#[derive(Debug, Default, Clone, Copy)]
pub struct DynamicPositionHandler;

#[async_trait]
impl ModificationHandler for DynamicPositionHandler {
    async fn apply(
        &self,
        tree: &PromptTree,
        modification: &PromptDynamicModification,
        _ctx: &ModificationContext,
    ) -> Result<()> {
        let (Some(param), Some(content)) = (
            &modification.dynamic_position_param,
            modification.content.as_deref(),
        ) else {
            tracing::debug!(
                id = %modification.id,
                "dynamicPosition without param or content, skipping"
            );
            return Ok(());
        };

        let node = modification_node(&modification.id, modification.source_path(), content)
            .with_caption(modification.caption.clone());

        if !tree.update(|roots| insert_at_position(roots, param, node)) {
            tracing::warn!(
                id = %modification.id,
                target_id = %param.target_id,
                "dynamicPosition target not found"
            );
        }
        Ok(())
    }
}
