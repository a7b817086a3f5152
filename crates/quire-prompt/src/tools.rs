//! Tool registry.
//!
//! # Architecture
//!
//! - `Tool`: an invocable capability with a parameter schema
//! - `ToolRegistry`: tools by id; backs tool-call validation and implements
//!   `AgentDefinitionService` for tool-list injection
//! - `WikiSearchTool`: the built-in `wiki-search` tool

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{PromptError, Result};
use crate::schema::ParameterSchema;
use crate::services::{
    AgentDefinitionService, AvailableTool, ToolSchemaSummary, WIKI_CHANNEL_RUN_FILTER,
    WikiService, WorkspaceService,
};

/// Id of the built-in wiki search tool.
pub const WIKI_SEARCH_TOOL_ID: &str = "wiki-search";

// ============================================================================
// Tool Trait
// ============================================================================

/// A tool the model may invoke with `<tool_use name="...">`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique id, the `name` attribute of the invocation marker.
    fn id(&self) -> &str;

    /// Display name.
    fn name(&self) -> &str;

    /// Human-readable description for the model.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's input parameters.
    fn parameters_schema(&self) -> Value;

    fn parameter_schema(&self) -> ParameterSchema {
        ParameterSchema::new(self.parameters_schema())
    }

    /// Execute the tool with the given parameters.
    async fn execute(&self, params: Value) -> Result<String>;

    /// Prose description as shown to the model.
    fn to_available(&self) -> AvailableTool {
        AvailableTool {
            id: self.id().to_string(),
            name: self.name().to_string(),
            description: self.description().to_string(),
            schema: ToolSchemaSummary {
                description: self.description().to_string(),
                parameters: self.parameter_schema().describe(),
            },
        }
    }
}

// ============================================================================
// Tool Registry
// ============================================================================

/// Registry of tools keyed by id.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Registry holding the built-in tools over the given services.
    pub fn with_builtin_tools(
        workspaces: Arc<dyn WorkspaceService>,
        wiki: Arc<dyn WikiService>,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(WikiSearchTool::new(workspaces, wiki));
        registry
    }

    /// Register a tool, replacing any tool with the same id.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    /// Register a tool (Arc version).
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let id = tool.id().to_string();
        self.tools.insert(id, tool);
    }

    pub fn get_tool(&self, id: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// All tool ids, sorted.
    pub fn tool_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tool_ids())
            .finish()
    }
}

#[async_trait]
impl AgentDefinitionService for ToolRegistry {
    async fn get_available_tools(&self) -> Result<Vec<AvailableTool>> {
        Ok(self
            .tool_ids()
            .into_iter()
            .filter_map(|id| self.tools.get(id))
            .map(|tool| tool.to_available())
            .collect())
    }
}

// ============================================================================
// Built-in: wiki-search
// ============================================================================

/// Parameters of the `wiki-search` tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WikiSearchParams {
    /// Name or id of the wiki workspace to search
    pub workspace_name: String,
    /// Wiki filter expression selecting the entries to return
    pub filter: String,
}

/// Searches a wiki workspace with a filter expression.
pub struct WikiSearchTool {
    workspaces: Arc<dyn WorkspaceService>,
    wiki: Arc<dyn WikiService>,
}

impl WikiSearchTool {
    pub fn new(workspaces: Arc<dyn WorkspaceService>, wiki: Arc<dyn WikiService>) -> Self {
        Self { workspaces, wiki }
    }
}

#[async_trait]
impl Tool for WikiSearchTool {
    fn id(&self) -> &str {
        WIKI_SEARCH_TOOL_ID
    }

    fn name(&self) -> &str {
        "Wiki search"
    }

    fn description(&self) -> &str {
        "Search a wiki workspace with a filter expression and return the titles of matching \
         entries."
    }

    fn parameters_schema(&self) -> Value {
        ParameterSchema::for_type::<WikiSearchParams>()
            .as_value()
            .clone()
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let params: WikiSearchParams = serde_json::from_value(params)?;

        let workspaces = self.workspaces.get_workspaces_as_list().await?;
        let workspace = workspaces
            .iter()
            .filter(|w| w.is_wiki_workspace())
            .find(|w| w.name == params.workspace_name || w.id == params.workspace_name)
            .ok_or_else(|| {
                PromptError::Service(format!(
                    "Wiki workspace not found: {}",
                    params.workspace_name
                ))
            })?;

        let titles = self
            .wiki
            .wiki_operation_in_server(
                WIKI_CHANNEL_RUN_FILTER,
                &workspace.id,
                vec![params.filter.clone()],
            )
            .await?;

        tracing::debug!(
            workspace = %workspace.name,
            filter = %params.filter,
            results = titles.len(),
            "Wiki search executed"
        );

        if titles.is_empty() {
            return Ok(format!(
                "No entries in \"{}\" match {}",
                workspace.name, params.filter
            ));
        }
        Ok(titles
            .iter()
            .map(|t| format!("- {}", t))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{InMemoryWikiService, InMemoryWorkspaceService, Workspace};
    use serde_json::json;

    fn registry() -> ToolRegistry {
        let workspaces = InMemoryWorkspaceService::new(vec![Workspace::wiki(
            "ws1",
            "notes",
            "/wiki/notes",
        )]);
        let wiki = InMemoryWikiService::new()
            .with_tiddler("ws1", "Rust", "systems language")
            .with_tiddler("ws1", "Go", "gophers");
        ToolRegistry::with_builtin_tools(Arc::new(workspaces), Arc::new(wiki))
    }

    #[test]
    fn test_tool_registry_new() {
        let registry = ToolRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.get_tool(WIKI_SEARCH_TOOL_ID).is_none());
    }

    #[test]
    fn test_builtin_registry_has_wiki_search() {
        let registry = registry();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.tool_ids(), vec![WIKI_SEARCH_TOOL_ID]);
    }

    #[test]
    fn test_wiki_search_schema_validates() {
        let tool = registry().get_tool(WIKI_SEARCH_TOOL_ID).unwrap();
        let schema = tool.parameter_schema();
        assert!(
            schema
                .validate(&json!({ "workspaceName": "notes", "filter": "rust" }))
                .unwrap()
                .is_empty()
        );
        let issues = schema.validate(&json!({ "workspaceName": 3 })).unwrap();
        assert_eq!(issues.len(), 2);
    }

    #[tokio::test]
    async fn test_wiki_search_execute() {
        let tool = registry().get_tool(WIKI_SEARCH_TOOL_ID).unwrap();
        let out = tool
            .execute(json!({ "workspaceName": "notes", "filter": "systems" }))
            .await
            .unwrap();
        assert_eq!(out, "- Rust");

        let none = tool
            .execute(json!({ "workspaceName": "ws1", "filter": "haskell" }))
            .await
            .unwrap();
        assert!(none.starts_with("No entries"));

        let missing = tool
            .execute(json!({ "workspaceName": "other", "filter": "x" }))
            .await;
        assert!(matches!(missing, Err(PromptError::Service(_))));
    }

    #[tokio::test]
    async fn test_available_tools_are_prose() {
        let tools = registry().get_available_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        let params = &tools[0].schema.parameters;
        assert!(params.contains("`workspaceName` (string, required)"));
        assert!(!params.contains("\"properties\""));
    }
}
