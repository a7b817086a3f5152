//! quire-prompt: prompt assembly engine for wiki-backed agents
//!
//! This crate turns a declarative agent definition into model input and
//! decides what happens after the model answers:
//! - Prompt trees with id-based location and position-aware insertion
//! - Dynamic modifications (history injection, fixed snippets, wiki tool
//!   lists, function output, URI content, protocol-server output)
//! - Duration-based visibility of conversation history
//! - Response placeholders filled from model output
//! - Continue-round handlers, including tool call detection and validation

pub mod agent;
pub mod backend;
pub mod continue_round;
pub mod duration;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod response;
pub mod schema;
pub mod services;
pub mod tool_calling;
pub mod tools;
pub mod tree;
pub mod trigger;
pub mod types;
pub mod uri;

// Testing utilities - available in test builds
#[cfg(test)]
pub mod testing;

pub use agent::{
    AgentPromptDescription, ConfigValidationError, FullReplacementParam, FullReplacementSource,
    FunctionParam, JavascriptToolParam, ModelContextProtocolParam, ModelTrigger, ModificationType,
    Position, PositionParameter, PromptConfig, PromptDynamicModification, Response,
    ResponseDynamicModification, ResponseModificationType, ResponseProcessing,
    RetrievalAugmentedGenerationParam, Trigger, WikiParam,
};
pub use backend::{
    GenerationConfig, GenerationEvent, GenerationStatus, LLMBackend, MockBackend, ResponseStream,
    collect_response,
};
pub use continue_round::{
    AgentHandlerContext, ContinueRoundHandler, ContinueRoundHandlerConfig, ContinueRoundRegistry,
    ContinueRoundResult, NO_CONTINUATION_REASON, process_continue_round,
};
pub use duration::{filter_messages_by_duration, is_visible};
pub use engine::{PromptConcatOutput, PromptEngine};
pub use error::{PromptError, Result};
pub use handlers::{
    DeferredTasks, DynamicPositionHandler, FullReplacementHandler, FunctionHandler, HandlerDeps,
    JavascriptToolHandler, MCP_RESPONSE_CAPTION, McpHandler, ModificationContext,
    ModificationHandler, ModificationRegistry, NO_HISTORY_TEXT,
    RetrievalAugmentedGenerationHandler, TOOL_LIST_TAG,
};
pub use response::{
    ResponseFullReplacementHandler, ResponseModificationHandler, ResponseModificationRegistry,
    apply_response_modifications,
};
pub use schema::{ParameterSchema, SchemaIssue};
pub use services::{
    AgentDefinitionService, AvailableTool, FunctionExecutor, InMemoryWikiService,
    InMemoryWorkspaceService, McpCallRequest, McpClient, StaticFunctionExecutor, StaticMcpClient,
    ToolSchemaSummary, WIKI_CHANNEL_GET_TIDDLER_TEXT, WIKI_CHANNEL_RUN_FILTER, WikiService,
    Workspace, WorkspaceService,
};
pub use tool_calling::{ToolCallMatch, ToolCallingHandler, match_tool_calling};
pub use tools::{Tool, ToolRegistry, WIKI_SEARCH_TOOL_ID, WikiSearchTool};
pub use tree::{
    PromptMatch, PromptSlot, PromptTree, find_prompt_by_id, flatten_prompts, insert_at_position,
    locate_prompt_mut,
};
pub use trigger::TriggerEvaluator;
pub use types::{AgentInstanceMessage, FlatPrompt, MessageRole, PromptNode, PromptRole};
pub use uri::{DefaultUriLoader, UriLoader};
