//! `function`: insert the output of a host function, run in the background.

use std::sync::Arc;

use async_trait::async_trait;

use super::{ModificationContext, ModificationHandler, call_with_timeout, modification_node};
use crate::agent::PromptDynamicModification;
use crate::error::{PromptError, Result};
use crate::services::FunctionExecutor;
use crate::tree::{PromptTree, insert_at_position};
use crate::trigger::TriggerEvaluator;
use crate::types::last_user_message_text;

/// Runs a host function in the background and inserts its output.
///
/// A timeout or failure inserts the configured timeout message instead.
pub struct FunctionHandler {
    functions: Arc<dyn FunctionExecutor>,
    trigger: TriggerEvaluator,
}

impl FunctionHandler {
    pub fn new(functions: Arc<dyn FunctionExecutor>, trigger: TriggerEvaluator) -> Self {
        Self { functions, trigger }
    }
}

impl std::fmt::Debug for FunctionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionHandler").finish_non_exhaustive()
    }
}

#[async_trait]
impl ModificationHandler for FunctionHandler {
    async fn apply(
        &self,
        tree: &PromptTree,
        modification: &PromptDynamicModification,
        ctx: &ModificationContext,
    ) -> Result<()> {
        let Some(param) = modification.function_param.clone() else {
            tracing::debug!(id = %modification.id, "function without param, skipping");
            return Ok(());
        };

        if !tree.contains(&param.position.target_id) {
            tracing::warn!(
                id = %modification.id,
                target_id = %param.position.target_id,
                "function target not found"
            );
            return Ok(());
        }

        let tree = tree.clone();
        let messages = ctx.shared_messages();
        let functions = Arc::clone(&self.functions);
        let trigger = self.trigger.clone();
        let modification_id = modification.id.clone();
        let source = modification.source_path();

        ctx.spawn_deferred(async move {
            let user_text = last_user_message_text(&messages);
            if !trigger.should_trigger(param.trigger.as_ref(), user_text).await {
                tracing::debug!(id = %modification_id, "function trigger not satisfied");
                return;
            }

            let call = functions.execute(&param.function_id, &messages);
            let text = match call_with_timeout(param.timeout(), &param.function_id, call).await {
                Ok(output) => output,
                Err(e @ PromptError::Timeout(_)) => {
                    tracing::warn!(
                        id = %modification_id,
                        function = %param.function_id,
                        error = %e,
                        "Function execution timed out"
                    );
                    param.timeout_message().to_string()
                }
                Err(e) => {
                    tracing::error!(
                        id = %modification_id,
                        function = %param.function_id,
                        error = %e,
                        "Function execution failed"
                    );
                    param.timeout_message().to_string()
                }
            };

            let node = modification_node(&modification_id, source, text);
            if !tree.update(|roots| insert_at_position(roots, &param.position, node)) {
                tracing::warn!(id = %modification_id, "function target disappeared before insert");
            }
        });
        Ok(())
    }
}
