//! Collaborator service contracts.
//!
//! The engine reaches workspaces, the wiki, host functions and protocol
//! servers only through these traits. In-memory implementations back the CLI
//! and the tests.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{PromptError, Result};
use crate::tool_calling::{self, ToolCallMatch};
use crate::types::AgentInstanceMessage;

/// Wiki channel that evaluates a filter and returns matching titles.
pub const WIKI_CHANNEL_RUN_FILTER: &str = "runFilter";
/// Wiki channel that returns the text of a single tiddler.
pub const WIKI_CHANNEL_GET_TIDDLER_TEXT: &str = "getTiddlerText";

// ============================================================================
// Workspaces
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: String,
    pub name: String,
    /// Present only for wiki workspaces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wiki_folder_location: Option<String>,
}

impl Workspace {
    pub fn wiki(
        id: impl Into<String>,
        name: impl Into<String>,
        folder: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            wiki_folder_location: Some(folder.into()),
        }
    }

    pub fn is_wiki_workspace(&self) -> bool {
        self.wiki_folder_location.is_some()
    }
}

#[async_trait]
pub trait WorkspaceService: Send + Sync {
    async fn get_workspaces_as_list(&self) -> Result<Vec<Workspace>>;
}

/// Fixed workspace list.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkspaceService {
    workspaces: Vec<Workspace>,
}

impl InMemoryWorkspaceService {
    pub fn new(workspaces: Vec<Workspace>) -> Self {
        Self { workspaces }
    }
}

#[async_trait]
impl WorkspaceService for InMemoryWorkspaceService {
    async fn get_workspaces_as_list(&self) -> Result<Vec<Workspace>> {
        Ok(self.workspaces.clone())
    }
}

// ============================================================================
// Agent Definitions
// ============================================================================

/// A tool as advertised to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableTool {
    pub id: String,
    pub name: String,
    pub description: String,
    pub schema: ToolSchemaSummary,
}

/// Prose description of a tool and its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSchemaSummary {
    pub description: String,
    /// Human-readable parameter list, free of JSON Schema syntax.
    pub parameters: String,
}

#[async_trait]
pub trait AgentDefinitionService: Send + Sync {
    async fn get_available_tools(&self) -> Result<Vec<AvailableTool>>;

    /// Detect a tool invocation marker in model output.
    fn match_tool_calling(&self, text: &str) -> Result<ToolCallMatch> {
        tool_calling::match_tool_calling(text)
    }
}

// ============================================================================
// Wiki
// ============================================================================

#[async_trait]
pub trait WikiService: Send + Sync {
    /// Run `channel` against the wiki of `workspace_id`.
    async fn wiki_operation_in_server(
        &self,
        channel: &str,
        workspace_id: &str,
        args: Vec<String>,
    ) -> Result<Vec<String>>;
}

/// Tiddlers held in memory, keyed by workspace id then title.
///
/// `runFilter` treats its argument as a case-insensitive substring matched
/// against titles and text; an empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWikiService {
    tiddlers: HashMap<String, Vec<(String, String)>>,
}

impl InMemoryWikiService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tiddler(
        mut self,
        workspace_id: impl Into<String>,
        title: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        self.tiddlers
            .entry(workspace_id.into())
            .or_default()
            .push((title.into(), text.into()));
        self
    }

    fn workspace(&self, workspace_id: &str) -> Result<&[(String, String)]> {
        self.tiddlers
            .get(workspace_id)
            .map(|t| t.as_slice())
            .ok_or_else(|| {
                PromptError::Service(format!("Unknown wiki workspace: {}", workspace_id))
            })
    }
}

#[async_trait]
impl WikiService for InMemoryWikiService {
    async fn wiki_operation_in_server(
        &self,
        channel: &str,
        workspace_id: &str,
        args: Vec<String>,
    ) -> Result<Vec<String>> {
        let tiddlers = self.workspace(workspace_id)?;
        let arg = args.into_iter().next().unwrap_or_default();

        match channel {
            WIKI_CHANNEL_RUN_FILTER => {
                let needle = arg.to_lowercase();
                Ok(tiddlers
                    .iter()
                    .filter(|(title, text)| {
                        needle.is_empty()
                            || title.to_lowercase().contains(&needle)
                            || text.to_lowercase().contains(&needle)
                    })
                    .map(|(title, _)| title.clone())
                    .collect())
            }
            WIKI_CHANNEL_GET_TIDDLER_TEXT => tiddlers
                .iter()
                .find(|(title, _)| *title == arg)
                .map(|(_, text)| vec![text.clone()])
                .ok_or_else(|| PromptError::Service(format!("Tiddler not found: {}", arg))),
            other => Err(PromptError::Service(format!(
                "Unsupported wiki channel: {}",
                other
            ))),
        }
    }
}

// ============================================================================
// Functions & Protocol Servers
// ============================================================================

/// Executes host functions referenced by `function` modifications.
#[async_trait]
pub trait FunctionExecutor: Send + Sync {
    async fn execute(&self, function_id: &str, messages: &[AgentInstanceMessage])
    -> Result<String>;
}

/// Returns a fixed output per function id.
#[derive(Debug, Clone, Default)]
pub struct StaticFunctionExecutor {
    outputs: HashMap<String, String>,
}

impl StaticFunctionExecutor {
    pub fn new(outputs: HashMap<String, String>) -> Self {
        Self { outputs }
    }

    pub fn with_output(
        mut self,
        function_id: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        self.outputs.insert(function_id.into(), output.into());
        self
    }
}

#[async_trait]
impl FunctionExecutor for StaticFunctionExecutor {
    async fn execute(
        &self,
        function_id: &str,
        _messages: &[AgentInstanceMessage],
    ) -> Result<String> {
        self.outputs
            .get(function_id)
            .cloned()
            .ok_or_else(|| {
                PromptError::Config(format!("No output configured for function: {}", function_id))
            })
    }
}

/// A call to a protocol server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpCallRequest {
    pub server_id: String,
    /// Text the server is asked about (the target node's text).
    pub input: String,
    /// Response modification ids the output should pass through.
    #[serde(default)]
    pub response_processing: Vec<String>,
}

#[async_trait]
pub trait McpClient: Send + Sync {
    async fn call_server(&self, request: McpCallRequest) -> Result<String>;
}

/// Returns a fixed output per server id.
#[derive(Debug, Clone, Default)]
pub struct StaticMcpClient {
    outputs: HashMap<String, String>,
}

impl StaticMcpClient {
    pub fn new(outputs: HashMap<String, String>) -> Self {
        Self { outputs }
    }

    pub fn with_output(mut self, server_id: impl Into<String>, output: impl Into<String>) -> Self {
        self.outputs.insert(server_id.into(), output.into());
        self
    }
}

#[async_trait]
impl McpClient for StaticMcpClient {
    async fn call_server(&self, request: McpCallRequest) -> Result<String> {
        self.outputs
            .get(&request.server_id)
            .cloned()
            .ok_or_else(|| {
                PromptError::Config(format!(
                    "No output configured for protocol server: {}",
                    request.server_id
                ))
            })
    }
}
