//! Tool invocation detection.
//!
//! Models invoke tools by emitting a marker:
//!
//! ```text
//! <tool_use name="wiki-search">{"workspaceName": "notes", "filter": "rust"}</tool_use>
//! ```
//!
//! Single or double quotes are accepted around the name, and the JSON body
//! may be empty.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::AgentPromptDescription;
use crate::continue_round::{AgentHandlerContext, ContinueRoundHandler, ContinueRoundResult};
use crate::error::{PromptError, Result};
use crate::services::AgentDefinitionService;
use crate::tools::ToolRegistry;

/// Registry id of the tool-calling continue-round handler.
pub const TOOL_CALLING_HANDLER_ID: &str = "toolCalling";
/// Priority of the tool-calling continue-round handler.
pub const TOOL_CALLING_HANDLER_PRIORITY: i32 = 100;

static TOOL_USE_PATTERN: OnceLock<std::result::Result<Regex, String>> = OnceLock::new();

fn tool_use_pattern() -> Result<&'static Regex> {
    TOOL_USE_PATTERN
        .get_or_init(|| {
            Regex::new(r#"(?s)<tool_use\s+name\s*=\s*["']([^"']+)["']\s*>(.*?)</tool_use>"#)
                .map_err(|e| e.to_string())
        })
        .as_ref()
        .map_err(|e| PromptError::Internal(format!("Invalid tool_use pattern: {}", e)))
}

/// Result of scanning model output for a tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallMatch {
    pub found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    /// Parsed JSON body; `None` when the body is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    /// The full marker as it appeared in the text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
}

impl ToolCallMatch {
    pub fn not_found() -> Self {
        Self::default()
    }
}

/// Find the first tool invocation marker in `text`.
///
/// Errors when a marker is present but its body is not valid JSON.
pub fn match_tool_calling(text: &str) -> Result<ToolCallMatch> {
    let Some(captures) = tool_use_pattern()?.captures(text) else {
        return Ok(ToolCallMatch::not_found());
    };

    let tool_id = captures[1].trim().to_string();
    let body = captures[2].trim();
    let parameters = if body.is_empty() {
        None
    } else {
        Some(serde_json::from_str::<Value>(body)?)
    };

    Ok(ToolCallMatch {
        found: true,
        tool_id: Some(tool_id),
        parameters,
        original_text: Some(captures[0].to_string()),
    })
}

// ============================================================================
// Continue-Round Handler
// ============================================================================

/// Continues the round when the model invoked a known tool with valid
/// parameters.
pub struct ToolCallingHandler {
    tools: Arc<ToolRegistry>,
}

impl ToolCallingHandler {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }

    fn evaluate(&self, llm_response: &str) -> Result<ContinueRoundResult> {
        let matched = self.tools.match_tool_calling(llm_response)?;
        let Some(tool_id) = matched.tool_id.filter(|_| matched.found) else {
            return Ok(ContinueRoundResult::stop("No tool calling patterns detected"));
        };

        let Some(tool) = self.tools.get_tool(&tool_id) else {
            tracing::warn!(tool = %tool_id, "Model invoked an unregistered tool");
            return Ok(ContinueRoundResult::stop(format!(
                "Tool \"{}\" not found in registry",
                tool_id
            )));
        };

        // A marker without a body carries no parameters to check.
        if let Some(parameters) = &matched.parameters {
            match tool.parameter_schema().validate(parameters) {
                Ok(issues) if issues.is_empty() => {}
                Ok(issues) => {
                    let details: Vec<String> = issues.iter().map(|i| i.to_string()).collect();
                    return Ok(ContinueRoundResult::stop(format!(
                        "Tool \"{}\" parameters validation failed: {}",
                        tool_id,
                        details.join(", ")
                    )));
                }
                Err(e) => {
                    return Ok(ContinueRoundResult::stop(format!(
                        "Tool \"{}\" parameter validation error: {}",
                        tool_id,
                        error_detail(&e)
                    )));
                }
            }
        }

        tracing::info!(tool = %tool_id, "Tool call detected");
        Ok(ContinueRoundResult::proceed(format!(
            "Tool calling detected: \"{}\", continuing for tool execution",
            tool_id
        )))
    }
}

impl std::fmt::Debug for ToolCallingHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCallingHandler")
            .field("tools", &self.tools)
            .finish()
    }
}

/// Error message without the variant prefix.
fn error_detail(e: &PromptError) -> String {
    match e {
        PromptError::Config(m)
        | PromptError::Service(m)
        | PromptError::Backend(m)
        | PromptError::Timeout(m)
        | PromptError::Uri(m)
        | PromptError::Network(m)
        | PromptError::Serialization(m)
        | PromptError::Schema(m)
        | PromptError::Io(m)
        | PromptError::Internal(m) => m.clone(),
    }
}

#[async_trait]
impl ContinueRoundHandler for ToolCallingHandler {
    async fn handle(
        &self,
        _agent: &AgentPromptDescription,
        llm_response: &str,
        _ctx: &AgentHandlerContext,
    ) -> Result<ContinueRoundResult> {
        Ok(self.evaluate(llm_response).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Tool calling detection failed");
            ContinueRoundResult::stop(format!(
                "Tool calling detection error: {}",
                error_detail(&e)
            ))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn id(&self) -> &str {
            "echo"
        }
        fn name(&self) -> &str {
            "Echo"
        }
        fn description(&self) -> &str {
            "Repeat the input"
        }
        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }
        async fn execute(&self, params: Value) -> Result<String> {
            Ok(params["text"].as_str().unwrap_or_default().to_string())
        }
    }

    struct BrokenSchemaTool;

    #[async_trait]
    impl Tool for BrokenSchemaTool {
        fn id(&self) -> &str {
            "broken"
        }
        fn name(&self) -> &str {
            "Broken"
        }
        fn description(&self) -> &str {
            "Has an unusable schema"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object", "required": "text" })
        }
        async fn execute(&self, _params: Value) -> Result<String> {
            Ok(String::new())
        }
    }

    fn handler() -> ToolCallingHandler {
        let mut tools = ToolRegistry::new();
        tools.register(EchoTool);
        tools.register(BrokenSchemaTool);
        ToolCallingHandler::new(Arc::new(tools))
    }

    async fn reason(text: &str) -> ContinueRoundResult {
        handler()
            .handle(
                &AgentPromptDescription::new("a"),
                text,
                &AgentHandlerContext::new("a", vec![]),
            )
            .await
            .unwrap()
    }

    #[test]
    fn test_match_double_and_single_quotes() {
        let m = match_tool_calling(r#"Sure. <tool_use name="echo">{"text": "hi"}</tool_use>"#)
            .unwrap();
        assert!(m.found);
        assert_eq!(m.tool_id.as_deref(), Some("echo"));
        assert_eq!(m.parameters, Some(json!({ "text": "hi" })));
        assert!(m.original_text.unwrap().starts_with("<tool_use"));

        let m = match_tool_calling("<tool_use name='echo'>\n{\"text\": \"hi\"}\n</tool_use>")
            .unwrap();
        assert!(m.found);
        assert_eq!(m.parameters, Some(json!({ "text": "hi" })));
    }

    #[test]
    fn test_match_empty_body_and_absent() {
        let m = match_tool_calling("<tool_use name='echo'></tool_use>").unwrap();
        assert!(m.found);
        assert!(m.parameters.is_none());

        let m = match_tool_calling("just an answer").unwrap();
        assert!(!m.found);
        assert!(m.tool_id.is_none());
    }

    #[test]
    fn test_match_invalid_json_is_error() {
        let err = match_tool_calling(r#"<tool_use name="echo">{not json}</tool_use>"#).unwrap_err();
        assert!(matches!(err, PromptError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_no_marker() {
        let result = reason("Here is your answer.").await;
        assert!(!result.continue_round);
        assert_eq!(result.reason.as_deref(), Some("No tool calling patterns detected"));
    }

    #[tokio::test]
    async fn test_unknown_tool_does_not_continue() {
        let result = reason(r#"<tool_use name="ghost">{}</tool_use>"#).await;
        assert!(!result.continue_round);
        assert_eq!(
            result.reason.as_deref(),
            Some("Tool \"ghost\" not found in registry")
        );
    }

    #[tokio::test]
    async fn test_invalid_parameters() {
        let result = reason(r#"<tool_use name="echo">{"text": 5}</tool_use>"#).await;
        assert!(!result.continue_round);
        assert_eq!(
            result.reason.as_deref(),
            Some("Tool \"echo\" parameters validation failed: text: Expected string, received integer")
        );

        let result = reason(r#"<tool_use name="echo">{}</tool_use>"#).await;
        assert!(result.reason.unwrap().ends_with("text: Required"));
    }

    #[tokio::test]
    async fn test_marker_without_body_skips_validation() {
        let result = reason(r#"<tool_use name="echo"></tool_use>"#).await;
        assert!(result.continue_round);
        assert_eq!(
            result.reason.as_deref(),
            Some("Tool calling detected: \"echo\", continuing for tool execution")
        );
    }

    #[tokio::test]
    async fn test_validator_error() {
        let result = reason(r#"<tool_use name="broken">{}</tool_use>"#).await;
        assert!(!result.continue_round);
        assert!(
            result
                .reason
                .unwrap()
                .starts_with("Tool \"broken\" parameter validation error: ")
        );
    }

    #[tokio::test]
    async fn test_valid_call_continues() {
        let result = reason(r#"<tool_use name="echo">{"text": "hi"}</tool_use>"#).await;
        assert!(result.continue_round);
        assert_eq!(
            result.reason.as_deref(),
            Some("Tool calling detected: \"echo\", continuing for tool execution")
        );
    }

    #[tokio::test]
    async fn test_detection_error_is_reported() {
        let result = reason(r#"<tool_use name="echo">{"text": }</tool_use>"#).await;
        assert!(!result.continue_round);
        assert!(
            result
                .reason
                .unwrap()
                .starts_with("Tool calling detection error: ")
        );
    }
}
