//! Core types for prompt assembly.
//!
//! These mirror the JSON shape of agent definitions (camelCase fields) so that
//! prompt trees and message histories authored elsewhere load unchanged.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a flattened prompt message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    /// System instructions (default for role-less roots).
    #[default]
    System,
    /// User turn.
    User,
    /// Assistant turn.
    Assistant,
}

impl PromptRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptRole::System => "system",
            PromptRole::User => "user",
            PromptRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for PromptRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of the hierarchical prompt document.
///
/// Only roots with `enabled == true` are flattened. Nested children are
/// concatenated into their root's text regardless of their own `role` or
/// `enabled` fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptNode {
    /// Identifier, unique within a tree by convention.
    pub id: String,
    /// Human label, display-only.
    #[serde(default)]
    pub caption: String,
    /// Whether a root node takes part in flattening.
    #[serde(default)]
    pub enabled: bool,
    /// Role of the message this node becomes when it is a root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<PromptRole>,
    /// Markers used by handlers to identify injected nodes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Text payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Ordered children.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PromptNode>,
    /// Provenance path, used for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Vec<String>>,
}

impl PromptNode {
    /// Create an empty, disabled node.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Create an enabled leaf carrying `text`.
    pub fn leaf(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id).enabled().with_text(text)
    }

    pub fn enabled(mut self) -> Self {
        self.enabled = true;
        self
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = caption.into();
        self
    }

    pub fn with_role(mut self, role: PromptRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_child(mut self, child: PromptNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_source(mut self, source: Vec<String>) -> Self {
        self.source = Some(source);
        self
    }

    /// Check whether this node carries `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Own text followed by the recursive text of every child.
    pub fn full_text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        if let Some(text) = &self.text {
            out.push_str(text);
        }
        for child in &self.children {
            child.collect_text(out);
        }
    }
}

/// Role of a message in the agent's conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    /// Legacy spelling of `assistant`.
    Agent,
    System,
    /// Anything else the history may contain (tool output, errors, ...).
    #[serde(other)]
    Other,
}

impl MessageRole {
    /// Map a history role onto a prompt role.
    ///
    /// `agent` becomes `assistant`; anything unrecognized becomes `user`.
    pub fn normalize(&self) -> PromptRole {
        match self {
            MessageRole::User | MessageRole::Other => PromptRole::User,
            MessageRole::Assistant | MessageRole::Agent => PromptRole::Assistant,
            MessageRole::System => PromptRole::System,
        }
    }
}

/// A message in an agent instance's conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInstanceMessage {
    pub id: String,
    #[serde(default)]
    pub agent_id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Last modification time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    /// Rounds this message stays visible to the model.
    ///
    /// `None` means always visible, `Some(0)` means never sent to the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AgentInstanceMessage {
    pub fn new(id: impl Into<String>, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent_id: String::new(),
            role,
            content: content.into(),
            content_type: None,
            modified: None,
            duration: None,
            metadata: HashMap::new(),
        }
    }

    pub fn user(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(id, MessageRole::User, content)
    }

    pub fn assistant(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(id, MessageRole::Assistant, content)
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    pub fn with_duration(mut self, duration: u32) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_user(&self) -> bool {
        self.role == MessageRole::User
    }
}

/// A role-tagged message ready for a model call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatPrompt {
    pub role: PromptRole,
    pub content: String,
}

impl FlatPrompt {
    pub fn new(role: PromptRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(PromptRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(PromptRole::User, content)
    }
}

/// Index of the most recent user-role message, scanning from the end.
pub fn last_user_message_index(messages: &[AgentInstanceMessage]) -> Option<usize> {
    messages.iter().rposition(|m| m.is_user())
}

/// Content of the most recent user-role message, or the empty string.
pub fn last_user_message_text(messages: &[AgentInstanceMessage]) -> &str {
    last_user_message_index(messages)
        .map(|i| messages[i].content.as_str())
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prompt_node_deserialize_camel_case() {
        let node: PromptNode = serde_json::from_value(json!({
            "id": "system",
            "caption": "System",
            "enabled": true,
            "role": "system",
            "text": "You are helpful.",
            "children": [{ "id": "child", "text": " Be brief." }]
        }))
        .unwrap();

        assert!(node.enabled);
        assert_eq!(node.role, Some(PromptRole::System));
        assert_eq!(node.children.len(), 1);
        assert!(!node.children[0].enabled);
        assert_eq!(node.full_text(), "You are helpful. Be brief.");
    }

    #[test]
    fn test_enabled_defaults_to_false() {
        let node: PromptNode = serde_json::from_value(json!({ "id": "x" })).unwrap();
        assert!(!node.enabled);
        assert!(node.text.is_none());
    }

    #[test]
    fn test_message_role_normalize() {
        assert_eq!(MessageRole::Agent.normalize(), PromptRole::Assistant);
        assert_eq!(MessageRole::Assistant.normalize(), PromptRole::Assistant);
        assert_eq!(MessageRole::System.normalize(), PromptRole::System);
        assert_eq!(MessageRole::User.normalize(), PromptRole::User);
        assert_eq!(MessageRole::Other.normalize(), PromptRole::User);
    }

    #[test]
    fn test_unknown_message_role_deserializes_as_other() {
        let msg: AgentInstanceMessage = serde_json::from_value(json!({
            "id": "m1",
            "agentId": "a1",
            "role": "tool",
            "content": "result"
        }))
        .unwrap();
        assert_eq!(msg.role, MessageRole::Other);
        assert_eq!(msg.agent_id, "a1");
        assert!(msg.duration.is_none());
    }

    #[test]
    fn test_last_user_message() {
        let messages = vec![
            AgentInstanceMessage::user("1", "first"),
            AgentInstanceMessage::assistant("2", "reply"),
            AgentInstanceMessage::user("3", "second"),
            AgentInstanceMessage::assistant("4", "reply again"),
        ];
        assert_eq!(last_user_message_index(&messages), Some(2));
        assert_eq!(last_user_message_text(&messages), "second");
        assert_eq!(last_user_message_text(&[]), "");
    }
}
