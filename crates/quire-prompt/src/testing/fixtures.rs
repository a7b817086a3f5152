//! Test fixtures and builders for common test scenarios.

use std::sync::Arc;

use crate::agent::{AgentPromptDescription, FullReplacementParam, PromptDynamicModification};
use crate::services::{InMemoryWikiService, InMemoryWorkspaceService, Workspace};
use crate::types::{AgentInstanceMessage, PromptNode};

// ============================================================================
// Agent Helpers
// ============================================================================

/// An agent with a system prompt and a history slot filled from the session.
pub fn history_agent() -> AgentPromptDescription {
    AgentPromptDescription::new("agent")
        .with_prompt(PromptNode::leaf("system", "You are helpful."))
        .with_prompt(PromptNode::new("history").enabled())
        .with_modification(PromptDynamicModification::full_replacement(
            "history",
            FullReplacementParam::history("history"),
        ))
}

// ============================================================================
// Message Helpers
// ============================================================================

/// A short exchange ending with an unanswered user message.
pub fn conversation() -> Vec<AgentInstanceMessage> {
    vec![
        AgentInstanceMessage::user("m1", "What is a tiddler?"),
        AgentInstanceMessage::assistant("m2", "A unit of content in a wiki."),
        AgentInstanceMessage::user("m3", "Find my notes on rust."),
    ]
}

/// A tool invocation marker as a model would emit it.
pub fn tool_call(tool_id: &str, parameters: serde_json::Value) -> String {
    format!(
        "Let me look that up. <tool_use name=\"{}\">{}</tool_use>",
        tool_id, parameters
    )
}

// ============================================================================
// Service Helpers
// ============================================================================

/// One wiki workspace `notes` (id `ws-notes`) with a few tiddlers, plus a
/// non-wiki workspace that tool lists must leave out.
pub fn wiki_services() -> (Arc<InMemoryWorkspaceService>, Arc<InMemoryWikiService>) {
    let workspaces = InMemoryWorkspaceService::new(vec![
        Workspace::wiki("ws-notes", "notes", "/wikis/notes"),
        Workspace {
            id: "ws-web".into(),
            name: "web".into(),
            wiki_folder_location: None,
        },
    ]);
    let wiki = InMemoryWikiService::new()
        .with_tiddler("ws-notes", "Rust ownership", "Borrowing rules.")
        .with_tiddler("ws-notes", "Async Rust", "Futures and executors.")
        .with_tiddler("ws-notes", "Gardening", "Tomatoes.");
    (Arc::new(workspaces), Arc::new(wiki))
}
