//! `modelContextProtocol`: insert a protocol server's answer about the target text.

use std::sync::Arc;

use async_trait::async_trait;

use super::{ModificationContext, ModificationHandler, call_with_timeout, modification_node};
use crate::agent::PromptDynamicModification;
use crate::error::{PromptError, Result};
use crate::services::{McpCallRequest, McpClient};
use crate::tree::{PromptTree, insert_at_position};
use crate::trigger::TriggerEvaluator;

/// Caption of nodes holding a protocol server's output.
pub const MCP_RESPONSE_CAPTION: &str = "MCP Tool Response";

/// Calls a model context protocol server in the background and inserts its
/// output.
///
/// The trigger is judged against the target node's text rather than the
/// user message. A timeout inserts the timeout message; any other failure
/// inserts nothing.
pub struct McpHandler {
    client: Arc<dyn McpClient>,
    trigger: TriggerEvaluator,
}

impl McpHandler {
    pub fn new(client: Arc<dyn McpClient>, trigger: TriggerEvaluator) -> Self {
        Self { client, trigger }
    }
}

impl std::fmt::Debug for McpHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpHandler").finish_non_exhaustive()
    }
}

#[async_trait]
impl ModificationHandler for McpHandler {
    async fn apply(
        &self,
        tree: &PromptTree,
        modification: &PromptDynamicModification,
        ctx: &ModificationContext,
    ) -> Result<()> {
        let Some(param) = modification.model_context_protocol_param.clone() else {
            tracing::debug!(id = %modification.id, "modelContextProtocol without param, skipping");
            return Ok(());
        };

        let Some(target) = tree.find(&param.position.target_id) else {
            tracing::warn!(
                id = %modification.id,
                target_id = %param.position.target_id,
                "modelContextProtocol target not found"
            );
            return Ok(());
        };
        let target_text = target.full_text();

        let tree = tree.clone();
        let client = Arc::clone(&self.client);
        let trigger = self.trigger.clone();
        let modification_id = modification.id.clone();
        let source = modification.source_path();

        ctx.spawn_deferred(async move {
            if !trigger
                .should_trigger(param.trigger.as_ref(), &target_text)
                .await
            {
                tracing::debug!(id = %modification_id, "MCP trigger not satisfied");
                return;
            }

            let request = McpCallRequest {
                server_id: param.id.clone(),
                input: target_text,
                response_processing: param
                    .response_processing
                    .as_ref()
                    .map(|p| p.id.clone())
                    .unwrap_or_default(),
            };

            let call = client.call_server(request);
            let text = match call_with_timeout(param.timeout(), &param.id, call).await {
                Ok(output) => output,
                Err(e @ PromptError::Timeout(_)) => {
                    tracing::warn!(
                        id = %modification_id,
                        server = %param.id,
                        error = %e,
                        "MCP server call timed out"
                    );
                    param.timeout_message().to_string()
                }
                Err(e) => {
                    tracing::error!(
                        id = %modification_id,
                        server = %param.id,
                        error = %e,
                        "MCP server call failed"
                    );
                    return;
                }
            };

            let node = modification_node(&modification_id, source, text)
                .with_caption(MCP_RESPONSE_CAPTION);
            if !tree.update(|roots| insert_at_position(roots, &param.position, node)) {
                tracing::warn!(id = %modification_id, "MCP target disappeared before insert");
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{
        DEFAULT_MCP_TIMEOUT_MESSAGE, ModelContextProtocolParam, PositionParameter, Trigger,
    };
    use crate::services::StaticMcpClient;
    use crate::types::{AgentInstanceMessage, PromptNode};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingClient {
        requests: Mutex<Vec<McpCallRequest>>,
    }

    #[async_trait]
    impl McpClient for RecordingClient {
        async fn call_server(&self, request: McpCallRequest) -> Result<String> {
            self.requests.lock().unwrap().push(request);
            Ok("42 degrees".into())
        }
    }

    struct HangingClient;

    #[async_trait]
    impl McpClient for HangingClient {
        async fn call_server(&self, _request: McpCallRequest) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("never".into())
        }
    }

    struct BrokenClient;

    #[async_trait]
    impl McpClient for BrokenClient {
        async fn call_server(&self, _request: McpCallRequest) -> Result<String> {
            Err(PromptError::Service("connection refused".into()))
        }
    }

    async fn run(client: Arc<dyn McpClient>, param: ModelContextProtocolParam) -> PromptTree {
        let tree = PromptTree::new(vec![PromptNode::leaf("weather", "Report the weather.")]);
        let handler = McpHandler::new(client, TriggerEvaluator::default());
        // The user message is irrelevant to the trigger.
        let ctx = ModificationContext::new(vec![AgentInstanceMessage::user("1", "hello")]);
        handler
            .apply(
                &tree,
                &PromptDynamicModification::model_context_protocol("mcp", param),
                &ctx,
            )
            .await
            .unwrap();
        ctx.take_deferred().settle().await;
        tree
    }

    #[tokio::test]
    async fn test_success_inserts_captioned_node() {
        let client = Arc::new(RecordingClient::default());
        let mut param = ModelContextProtocolParam::new(PositionParameter::after("weather"), "wx");
        param.trigger = Some(Trigger::search("WEATHER"));
        param.response_processing = Some(crate::agent::ResponseProcessing {
            id: vec!["post".into()],
        });
        let tree = run(client.clone(), param).await;

        let roots = tree.snapshot();
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[1].caption, MCP_RESPONSE_CAPTION);
        assert_eq!(roots[1].full_text(), "42 degrees");

        let requests = client.requests.lock().unwrap();
        assert_eq!(requests[0].server_id, "wx");
        assert_eq!(requests[0].input, "Report the weather.");
        assert_eq!(requests[0].response_processing, vec!["post"]);
    }

    #[tokio::test]
    async fn test_trigger_uses_target_text() {
        let client = Arc::new(StaticMcpClient::default().with_output("wx", "sunny"));
        let mut param = ModelContextProtocolParam::new(PositionParameter::after("weather"), "wx");
        param.trigger = Some(Trigger::search("hello"));
        let tree = run(client, param).await;
        assert_eq!(tree.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_inserts_message() {
        let mut param = ModelContextProtocolParam::new(PositionParameter::after("weather"), "wx");
        param.timeout_second = Some(0.05);
        let tree = run(Arc::new(HangingClient), param).await;
        assert_eq!(tree.snapshot()[1].full_text(), DEFAULT_MCP_TIMEOUT_MESSAGE);
    }

    #[tokio::test]
    async fn test_failure_inserts_nothing() {
        let param = ModelContextProtocolParam::new(PositionParameter::after("weather"), "wx");
        let tree = run(Arc::new(BrokenClient), param).await;
        assert_eq!(tree.snapshot().len(), 1);
    }
}
