//! Agent prompt configuration.
//!
//! An agent definition carries a prompt tree, the ordered list of dynamic
//! modifications applied to it before every model call, and the response
//! placeholders filled in after the model answers.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tree::find_prompt_by_id;
use crate::types::PromptNode;

/// Default time budget for function and protocol-server calls.
pub const DEFAULT_TIMEOUT_SECOND: f64 = 10.0;
/// Default text inserted when a function call times out or fails.
pub const DEFAULT_FUNCTION_TIMEOUT_MESSAGE: &str = "Function execution timed out";
/// Default text inserted when a protocol-server call times out.
pub const DEFAULT_MCP_TIMEOUT_MESSAGE: &str = "MCP server call timed out";

// ============================================================================
// Agent Description
// ============================================================================

/// Prompt-related part of an agent definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPromptDescription {
    pub id: String,
    #[serde(default)]
    pub prompt_config: PromptConfig,
}

/// The declarative prompt document and its modification lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptConfig {
    #[serde(default)]
    pub prompts: Vec<PromptNode>,
    #[serde(default)]
    pub prompt_dynamic_modification: Vec<PromptDynamicModification>,
    #[serde(default)]
    pub response: Vec<Response>,
    #[serde(default)]
    pub response_dynamic_modification: Vec<ResponseDynamicModification>,
}

impl AgentPromptDescription {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt_config: PromptConfig::default(),
        }
    }

    pub fn with_prompt(mut self, prompt: PromptNode) -> Self {
        self.prompt_config.prompts.push(prompt);
        self
    }

    pub fn with_modification(mut self, modification: PromptDynamicModification) -> Self {
        self.prompt_config.prompt_dynamic_modification.push(modification);
        self
    }

    pub fn with_response(mut self, response: Response) -> Self {
        self.prompt_config.response.push(response);
        self
    }

    pub fn with_response_modification(mut self, modification: ResponseDynamicModification) -> Self {
        self.prompt_config
            .response_dynamic_modification
            .push(modification);
        self
    }
}

// ============================================================================
// Prompt Dynamic Modifications
// ============================================================================

/// Kind of a prompt dynamic modification; the registry dispatch key.
///
/// Unrecognized type strings load as `Unknown`, which no built-in handler
/// serves, so the pipeline logs and skips them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModificationType {
    FullReplacement,
    DynamicPosition,
    RetrievalAugmentedGeneration,
    Function,
    JavascriptTool,
    ModelContextProtocol,
    #[serde(other)]
    Unknown,
}

impl ModificationType {
    pub const ALL: [ModificationType; 6] = [
        ModificationType::FullReplacement,
        ModificationType::DynamicPosition,
        ModificationType::RetrievalAugmentedGeneration,
        ModificationType::Function,
        ModificationType::JavascriptTool,
        ModificationType::ModelContextProtocol,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModificationType::FullReplacement => "fullReplacement",
            ModificationType::DynamicPosition => "dynamicPosition",
            ModificationType::RetrievalAugmentedGeneration => "retrievalAugmentedGeneration",
            ModificationType::Function => "function",
            ModificationType::JavascriptTool => "javascriptTool",
            ModificationType::ModelContextProtocol => "modelContextProtocol",
            ModificationType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ModificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declarative instruction that mutates the prompt tree before a model call.
///
/// Exactly one `*_param` field is expected to be set, matching
/// `dynamic_modification_type`. A missing param turns the handler into a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptDynamicModification {
    pub id: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub forbid_overrides: bool,
    pub dynamic_modification_type: ModificationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_replacement_param: Option<FullReplacementParam>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_position_param: Option<PositionParameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval_augmented_generation_param: Option<RetrievalAugmentedGenerationParam>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_param: Option<FunctionParam>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub javascript_tool_param: Option<JavascriptToolParam>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_context_protocol_param: Option<ModelContextProtocolParam>,
}

impl PromptDynamicModification {
    /// Create a modification of `kind` with no param set.
    pub fn new(id: impl Into<String>, kind: ModificationType) -> Self {
        Self {
            id: id.into(),
            caption: String::new(),
            content: None,
            forbid_overrides: false,
            dynamic_modification_type: kind,
            full_replacement_param: None,
            dynamic_position_param: None,
            retrieval_augmented_generation_param: None,
            function_param: None,
            javascript_tool_param: None,
            model_context_protocol_param: None,
        }
    }

    pub fn full_replacement(id: impl Into<String>, param: FullReplacementParam) -> Self {
        let mut m = Self::new(id, ModificationType::FullReplacement);
        m.full_replacement_param = Some(param);
        m
    }

    pub fn dynamic_position(
        id: impl Into<String>,
        content: impl Into<String>,
        param: PositionParameter,
    ) -> Self {
        let mut m = Self::new(id, ModificationType::DynamicPosition);
        m.content = Some(content.into());
        m.dynamic_position_param = Some(param);
        m
    }

    pub fn retrieval_augmented_generation(
        id: impl Into<String>,
        param: RetrievalAugmentedGenerationParam,
    ) -> Self {
        let mut m = Self::new(id, ModificationType::RetrievalAugmentedGeneration);
        m.retrieval_augmented_generation_param = Some(param);
        m
    }

    pub fn function(id: impl Into<String>, param: FunctionParam) -> Self {
        let mut m = Self::new(id, ModificationType::Function);
        m.function_param = Some(param);
        m
    }

    pub fn javascript_tool(id: impl Into<String>, param: JavascriptToolParam) -> Self {
        let mut m = Self::new(id, ModificationType::JavascriptTool);
        m.javascript_tool_param = Some(param);
        m
    }

    pub fn model_context_protocol(id: impl Into<String>, param: ModelContextProtocolParam) -> Self {
        let mut m = Self::new(id, ModificationType::ModelContextProtocol);
        m.model_context_protocol_param = Some(param);
        m
    }

    /// Whether the param matching the declared type is present.
    pub fn has_matching_param(&self) -> bool {
        match self.dynamic_modification_type {
            ModificationType::FullReplacement => self.full_replacement_param.is_some(),
            ModificationType::DynamicPosition => self.dynamic_position_param.is_some(),
            ModificationType::RetrievalAugmentedGeneration => {
                self.retrieval_augmented_generation_param.is_some()
            }
            ModificationType::Function => self.function_param.is_some(),
            ModificationType::JavascriptTool => self.javascript_tool_param.is_some(),
            ModificationType::ModelContextProtocol => self.model_context_protocol_param.is_some(),
            ModificationType::Unknown => false,
        }
    }

    /// Provenance path stamped on nodes this modification creates.
    pub fn source_path(&self) -> Vec<String> {
        vec!["promptDynamicModification".to_string(), self.id.clone()]
    }
}

// ============================================================================
// Positions & Triggers
// ============================================================================

/// Where new content is spliced relative to a target node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    /// Appended to the target's children.
    #[default]
    Relative,
    /// Inserted into the target's children at an offset from `top` or `bottom`.
    Absolute,
    /// Sibling immediately before the target.
    Before,
    /// Sibling immediately after the target.
    After,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionParameter {
    #[serde(default)]
    pub position: Position,
    pub target_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bottom: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top: Option<usize>,
}

impl PositionParameter {
    pub fn new(position: Position, target_id: impl Into<String>) -> Self {
        Self {
            position,
            target_id: target_id.into(),
            bottom: None,
            top: None,
        }
    }

    pub fn before(target_id: impl Into<String>) -> Self {
        Self::new(Position::Before, target_id)
    }

    pub fn after(target_id: impl Into<String>) -> Self {
        Self::new(Position::After, target_id)
    }

    pub fn relative(target_id: impl Into<String>) -> Self {
        Self::new(Position::Relative, target_id)
    }
}

/// Condition gating whether a modification activates this turn.
///
/// Every condition that is set must pass. A trigger with nothing set passes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    /// Case-insensitive keyword that must appear in the inspected text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    /// Probability in `[0, 1]` of activating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_chance: Option<f64>,
    /// Pattern that must match the inspected text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Ask a model to judge yes/no.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelTrigger>,
}

impl Trigger {
    pub fn search(keyword: impl Into<String>) -> Self {
        Self {
            search: Some(keyword.into()),
            ..Default::default()
        }
    }

    pub fn random_chance(chance: f64) -> Self {
        Self {
            random_chance: Some(chance),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTrigger {
    /// Model preset name passed to the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Question asked about the inspected text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

// ============================================================================
// Handler Params
// ============================================================================

/// Where full-replacement content comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FullReplacementSource {
    /// Conversation history (prompt phase).
    HistoryOfSession,
    /// The raw model output (response phase).
    LlmResponse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullReplacementParam {
    pub target_id: String,
    pub source_type: FullReplacementSource,
}

impl FullReplacementParam {
    pub fn history(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            source_type: FullReplacementSource::HistoryOfSession,
        }
    }

    pub fn llm_response(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            source_type: FullReplacementSource::LlmResponse,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RetrievalSourceType {
    #[default]
    Wiki,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WikiParam {
    pub workspace_name: String,
    pub filter: String,
}

/// Scheduling hints for removing injected content.
///
/// Accepted for compatibility with existing agent definitions; not enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovalParam {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_after_chat_round: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cool_down_chat_round_after_last_shown: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalAugmentedGenerationParam {
    #[serde(default)]
    pub source_type: RetrievalSourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wiki_param: Option<WikiParam>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_list_position: Option<PositionParameter>,
    /// Former tool-result injection point. Accepted and ignored: tool results
    /// reach the model through message history instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_position: Option<PositionParameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removal: Option<RemovalParam>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionParam {
    #[serde(flatten)]
    pub position: PositionParameter,
    pub function_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_second: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,
}

impl FunctionParam {
    pub fn new(position: PositionParameter, function_id: impl Into<String>) -> Self {
        Self {
            position,
            function_id: function_id.into(),
            timeout_second: None,
            timeout_message: None,
            trigger: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        timeout_from_seconds(self.timeout_second)
    }

    pub fn timeout_message(&self) -> &str {
        self.timeout_message
            .as_deref()
            .unwrap_or(DEFAULT_FUNCTION_TIMEOUT_MESSAGE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JavascriptToolParam {
    #[serde(flatten)]
    pub position: PositionParameter,
    pub uri: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseProcessing {
    /// Ids of response modifications the server output should pass through.
    #[serde(default)]
    pub id: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelContextProtocolParam {
    #[serde(flatten)]
    pub position: PositionParameter,
    /// Identifier of the protocol server.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_second: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_processing: Option<ResponseProcessing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,
}

impl ModelContextProtocolParam {
    pub fn new(position: PositionParameter, server_id: impl Into<String>) -> Self {
        Self {
            position,
            id: server_id.into(),
            timeout_second: None,
            timeout_message: None,
            response_processing: None,
            trigger: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        timeout_from_seconds(self.timeout_second)
    }

    pub fn timeout_message(&self) -> &str {
        self.timeout_message
            .as_deref()
            .unwrap_or(DEFAULT_MCP_TIMEOUT_MESSAGE)
    }
}

/// Convert a configured seconds value, falling back to the default for
/// missing, negative or non-finite values.
fn timeout_from_seconds(seconds: Option<f64>) -> Duration {
    seconds
        .filter(|s| *s > 0.0)
        .and_then(|s| Duration::try_from_secs_f64(s).ok())
        .unwrap_or_else(|| Duration::from_secs_f64(DEFAULT_TIMEOUT_SECOND))
}

// ============================================================================
// Responses
// ============================================================================

/// A response placeholder filled in after the model answers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub id: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Response {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseModificationType {
    FullReplacement,
}

impl ResponseModificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseModificationType::FullReplacement => "fullReplacement",
        }
    }
}

impl std::fmt::Display for ResponseModificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declarative instruction that mutates the response list after a model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseDynamicModification {
    pub id: String,
    #[serde(default)]
    pub caption: String,
    pub response_dynamic_modification_type: ResponseModificationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_replacement_param: Option<FullReplacementParam>,
}

impl ResponseDynamicModification {
    pub fn full_replacement(id: impl Into<String>, param: FullReplacementParam) -> Self {
        Self {
            id: id.into(),
            caption: String::new(),
            response_dynamic_modification_type: ResponseModificationType::FullReplacement,
            full_replacement_param: Some(param),
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Agent definition validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigValidationError {}

impl AgentPromptDescription {
    /// Validate the definition.
    ///
    /// The pipelines tolerate every problem reported here (they log and skip),
    /// so this is an authoring aid rather than a precondition.
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();
        let config = &self.prompt_config;

        let mut seen = HashSet::new();
        collect_duplicate_ids(&config.prompts, &mut seen, &mut errors);

        for (i, m) in config.prompt_dynamic_modification.iter().enumerate() {
            let field = format!("promptDynamicModification[{}]", i);
            if m.dynamic_modification_type == ModificationType::Unknown {
                errors.push(ConfigValidationError {
                    field: field.clone(),
                    message: format!("Modification '{}' has an unsupported type.", m.id),
                });
                continue;
            }
            if !m.has_matching_param() {
                errors.push(ConfigValidationError {
                    field: field.clone(),
                    message: format!(
                        "Modification '{}' of type {} has no {}Param.",
                        m.id, m.dynamic_modification_type, m.dynamic_modification_type
                    ),
                });
                continue;
            }

            for target in prompt_targets(m) {
                if find_prompt_by_id(&config.prompts, target).is_none() {
                    errors.push(ConfigValidationError {
                        field: field.clone(),
                        message: format!(
                            "Modification '{}' targets unknown prompt '{}'.",
                            m.id, target
                        ),
                    });
                }
            }

            for trigger in triggers(m) {
                if let Some(chance) = trigger.random_chance {
                    if !(0.0..=1.0).contains(&chance) {
                        errors.push(ConfigValidationError {
                            field: field.clone(),
                            message: format!("randomChance {} is outside [0, 1].", chance),
                        });
                    }
                }
            }
        }

        for (i, m) in config.response_dynamic_modification.iter().enumerate() {
            let field = format!("responseDynamicModification[{}]", i);
            match &m.full_replacement_param {
                None => errors.push(ConfigValidationError {
                    field,
                    message: format!("Modification '{}' has no fullReplacementParam.", m.id),
                }),
                Some(param) => {
                    if !config.response.iter().any(|r| r.id == param.target_id) {
                        errors.push(ConfigValidationError {
                            field,
                            message: format!(
                                "Modification '{}' targets unknown response '{}'.",
                                m.id, param.target_id
                            ),
                        });
                    }
                }
            }
        }

        errors
    }
}

fn collect_duplicate_ids<'a>(
    nodes: &'a [PromptNode],
    seen: &mut HashSet<&'a str>,
    errors: &mut Vec<ConfigValidationError>,
) {
    for node in nodes {
        if !seen.insert(node.id.as_str()) {
            errors.push(ConfigValidationError {
                field: "prompts".to_string(),
                message: format!("Duplicate prompt id '{}'.", node.id),
            });
        }
        collect_duplicate_ids(&node.children, seen, errors);
    }
}

/// Prompt ids a modification expects to find in the prompt tree.
fn prompt_targets(m: &PromptDynamicModification) -> Vec<&str> {
    let mut targets = Vec::new();
    if let Some(p) = &m.full_replacement_param {
        if p.source_type == FullReplacementSource::HistoryOfSession {
            targets.push(p.target_id.as_str());
        }
    }
    if let Some(p) = &m.dynamic_position_param {
        targets.push(p.target_id.as_str());
    }
    if let Some(p) = &m.retrieval_augmented_generation_param {
        if let Some(pos) = &p.tool_list_position {
            targets.push(pos.target_id.as_str());
        }
    }
    if let Some(p) = &m.function_param {
        targets.push(p.position.target_id.as_str());
    }
    if let Some(p) = &m.javascript_tool_param {
        targets.push(p.position.target_id.as_str());
    }
    if let Some(p) = &m.model_context_protocol_param {
        targets.push(p.position.target_id.as_str());
    }
    targets
}

fn triggers(m: &PromptDynamicModification) -> Vec<&Trigger> {
    [
        m.retrieval_augmented_generation_param
            .as_ref()
            .and_then(|p| p.trigger.as_ref()),
        m.function_param.as_ref().and_then(|p| p.trigger.as_ref()),
        m.model_context_protocol_param
            .as_ref()
            .and_then(|p| p.trigger.as_ref()),
    ]
    .into_iter()
    .flatten()
    .collect()
}
