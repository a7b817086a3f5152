//! `javascriptTool`: insert content loaded from a `tidgi://`, `http(s)://` or `file://` URI.

use std::sync::Arc;

use async_trait::async_trait;

use super::{ModificationContext, ModificationHandler, modification_node};
use crate::agent::PromptDynamicModification;
use crate::error::Result;
use crate::tree::{PromptTree, insert_at_position};
use crate::uri::UriLoader;

/// Loads tool content from a URI in the background and inserts it.
pub struct JavascriptToolHandler {
    loader: Arc<dyn UriLoader>,
}

impl JavascriptToolHandler {
    pub fn new(loader: Arc<dyn UriLoader>) -> Self {
        Self { loader }
    }
}

impl std::fmt::Debug for JavascriptToolHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JavascriptToolHandler").finish_non_exhaustive()
    }
}

#[async_trait]
impl ModificationHandler for JavascriptToolHandler {
    async fn apply(
        &self,
        tree: &PromptTree,
        modification: &PromptDynamicModification,
        ctx: &ModificationContext,
    ) -> Result<()> {
        let Some(param) = modification.javascript_tool_param.clone() else {
            tracing::debug!(id = %modification.id, "javascriptTool without param, skipping");
            return Ok(());
        };

        if !tree.contains(&param.position.target_id) {
            tracing::warn!(
                id = %modification.id,
                target_id = %param.position.target_id,
                "javascriptTool target not found"
            );
            return Ok(());
        }

        let tree = tree.clone();
        let loader = Arc::clone(&self.loader);
        let modification_id = modification.id.clone();
        let source = modification.source_path();

        ctx.spawn_deferred(async move {
            let content = match loader.load_content_from_uri(&param.uri).await {
                Ok(content) => content,
                Err(e) => {
                    tracing::error!(
                        id = %modification_id,
                        uri = %param.uri,
                        error = %e,
                        "Failed to load tool content"
                    );
                    return;
                }
            };

            let node = modification_node(&modification_id, source, content);
            if !tree.update(|roots| insert_at_position(roots, &param.position, node)) {
                tracing::warn!(
                    id = %modification_id,
                    "javascriptTool target disappeared before insert"
                );
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{JavascriptToolParam, PositionParameter};
    use crate::services::InMemoryWikiService;
    use crate::types::PromptNode;
    use crate::uri::DefaultUriLoader;

    fn handler() -> JavascriptToolHandler {
        let wiki = InMemoryWikiService::new().with_tiddler("ws1", "Calc", "function add(a, b) {}");
        JavascriptToolHandler::new(Arc::new(DefaultUriLoader::new(Arc::new(wiki))))
    }

    async fn run(uri: &str) -> PromptTree {
        let tree = PromptTree::new(vec![PromptNode::leaf("tools", "Tools:")]);
        let modification = PromptDynamicModification::javascript_tool(
            "js",
            JavascriptToolParam {
                position: PositionParameter::relative("tools"),
                uri: uri.to_string(),
            },
        );
        let ctx = ModificationContext::new(vec![]);
        handler().apply(&tree, &modification, &ctx).await.unwrap();
        ctx.take_deferred().settle().await;
        tree
    }

    #[tokio::test]
    async fn test_loaded_content_is_inserted() {
        let tree = run("tidgi://ws1/Calc").await;
        assert_eq!(tree.flatten()[0].content, "Tools:function add(a, b) {}");
    }

    #[tokio::test]
    async fn test_load_failure_inserts_nothing() {
        let tree = run("tidgi://ws1/Missing").await;
        assert_eq!(tree.flatten()[0].content, "Tools:");

        let tree = run("gopher://old").await;
        assert!(tree.find("tools").unwrap().children.is_empty());
    }
}
