//! Prompt dynamic modification handlers.
//!
//! # Architecture
//!
//! - `ModificationHandler`: applies one kind of modification to a `PromptTree`
//! - `ModificationRegistry`: handlers keyed by `ModificationType`
//! - `ModificationContext`: per-invocation state (message history, deferred tasks)
//! - `HandlerDeps`: collaborator services the built-in handlers are wired with
//!
//! Handlers for `function`, `javascriptTool` and `modelContextProtocol` do
//! their work in a spawned task and return at once. Spawned tasks wait until
//! `ModificationContext::take_deferred` releases them, which the engine calls
//! after flattening, so their mutation never reaches the current turn.

mod dynamic_position;
mod full_replacement;
mod function;
mod javascript_tool;
mod mcp;
mod rag;

pub use dynamic_position::DynamicPositionHandler;
pub use full_replacement::{FullReplacementHandler, NO_HISTORY_TEXT};
pub use function::FunctionHandler;
pub use javascript_tool::JavascriptToolHandler;
pub use mcp::{MCP_RESPONSE_CAPTION, McpHandler};
pub use rag::{RetrievalAugmentedGenerationHandler, TOOL_LIST_TAG};

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::agent::{ModificationType, PromptDynamicModification};
use crate::backend::LLMBackend;
use crate::error::{PromptError, Result};
use crate::services::{
    AgentDefinitionService, FunctionExecutor, InMemoryWikiService, InMemoryWorkspaceService,
    McpClient, StaticFunctionExecutor, StaticMcpClient, WikiService, WorkspaceService,
};
use crate::tools::ToolRegistry;
use crate::tree::PromptTree;
use crate::trigger::TriggerEvaluator;
use crate::types::{AgentInstanceMessage, PromptNode};
use crate::uri::{DefaultUriLoader, UriLoader};

// ============================================================================
// Handler Trait
// ============================================================================

/// Applies one kind of prompt dynamic modification.
#[async_trait]
pub trait ModificationHandler: Send + Sync {
    /// Mutate `tree` according to `modification`.
    ///
    /// A missing param or target is a logged no-op, not an error.
    async fn apply(
        &self,
        tree: &PromptTree,
        modification: &PromptDynamicModification,
        ctx: &ModificationContext,
    ) -> Result<()>;
}

/// State shared by the handlers of one pipeline invocation.
#[derive(Debug)]
pub struct ModificationContext {
    messages: Arc<Vec<AgentInstanceMessage>>,
    deferred: Mutex<Vec<JoinHandle<()>>>,
    release: watch::Sender<bool>,
}

impl ModificationContext {
    pub fn new(messages: Vec<AgentInstanceMessage>) -> Self {
        let (release, _) = watch::channel(false);
        Self {
            messages: Arc::new(messages),
            deferred: Mutex::new(Vec::new()),
            release,
        }
    }

    /// Message history, oldest first.
    pub fn messages(&self) -> &[AgentInstanceMessage] {
        &self.messages
    }

    pub fn shared_messages(&self) -> Arc<Vec<AgentInstanceMessage>> {
        Arc::clone(&self.messages)
    }

    /// Run `task` detached from the pipeline, keeping its handle.
    ///
    /// The task starts once `take_deferred` is called or this context is
    /// dropped.
    pub fn spawn_deferred<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut released = self.release.subscribe();
        let handle = tokio::spawn(async move {
            // A closed channel means the context is gone; run anyway.
            let _ = released.wait_for(|go| *go).await;
            task.await;
        });
        self.deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Release every task spawned so far and take their handles.
    pub fn take_deferred(&self) -> DeferredTasks {
        self.release.send_replace(true);
        let handles = std::mem::take(
            &mut *self
                .deferred
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        DeferredTasks { handles }
    }
}

/// Handles of the background tasks spawned during one pipeline invocation.
///
/// Dropping this leaves the tasks running.
#[derive(Debug, Default)]
pub struct DeferredTasks {
    handles: Vec<JoinHandle<()>>,
}

impl DeferredTasks {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every task to finish.
    pub async fn settle(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Deferred modification task failed");
            }
        }
    }
}

/// Race `call` against `limit`; an elapsed limit becomes `PromptError::Timeout`.
pub(crate) async fn call_with_timeout<F>(limit: Duration, what: &str, call: F) -> Result<String>
where
    F: Future<Output = Result<String>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(PromptError::Timeout(format!(
            "{} exceeded {} ms",
            what,
            limit.as_millis()
        ))),
    }
}

/// A node created by a modification: enabled, stamped with its provenance.
pub(crate) fn modification_node(
    modification_id: &str,
    source: Vec<String>,
    text: impl Into<String>,
) -> PromptNode {
    PromptNode::leaf(
        format!("{}-{}", modification_id, uuid::Uuid::new_v4()),
        text,
    )
    .with_source(source)
}

// ============================================================================
// Registry
// ============================================================================

/// Handlers keyed by modification type.
///
/// Registration is expected at startup; lookups take a read lock.
#[derive(Default)]
pub struct ModificationRegistry {
    handlers: RwLock<HashMap<ModificationType, Arc<dyn ModificationHandler>>>,
}

impl ModificationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the six built-in handlers wired to `deps`.
    pub fn with_builtin_handlers(deps: &HandlerDeps) -> Self {
        let registry = Self::new();
        let trigger = TriggerEvaluator::new(deps.backend.clone());

        registry.register(
            ModificationType::FullReplacement,
            Arc::new(FullReplacementHandler),
        );
        registry.register(
            ModificationType::DynamicPosition,
            Arc::new(DynamicPositionHandler),
        );
        registry.register(
            ModificationType::RetrievalAugmentedGeneration,
            Arc::new(RetrievalAugmentedGenerationHandler::new(
                deps.workspaces.clone(),
                deps.agent_definitions.clone(),
                trigger.clone(),
            )),
        );
        registry.register(
            ModificationType::Function,
            Arc::new(FunctionHandler::new(deps.functions.clone(), trigger.clone())),
        );
        registry.register(
            ModificationType::JavascriptTool,
            Arc::new(JavascriptToolHandler::new(deps.uri_loader.clone())),
        );
        registry.register(
            ModificationType::ModelContextProtocol,
            Arc::new(McpHandler::new(deps.mcp.clone(), trigger)),
        );
        registry
    }

    /// Register `handler` for `kind`, replacing any previous one.
    pub fn register(&self, kind: ModificationType, handler: Arc<dyn ModificationHandler>) {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if handlers.insert(kind, handler).is_some() {
            tracing::debug!(kind = %kind, "Replaced modification handler");
        }
    }

    pub fn get(&self, kind: ModificationType) -> Option<Arc<dyn ModificationHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every handler.
    pub fn clear(&self) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl std::fmt::Debug for ModificationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<&'static str> = self
            .handlers
            .read()
            .map(|h| h.keys().map(|k| k.as_str()).collect())
            .unwrap_or_default();
        f.debug_struct("ModificationRegistry")
            .field("handlers", &kinds)
            .finish()
    }
}

// ============================================================================
// Dependencies
// ============================================================================

/// Collaborator services the built-in handlers use.
#[derive(Clone)]
pub struct HandlerDeps {
    pub workspaces: Arc<dyn WorkspaceService>,
    pub agent_definitions: Arc<dyn AgentDefinitionService>,
    pub functions: Arc<dyn FunctionExecutor>,
    pub uri_loader: Arc<dyn UriLoader>,
    pub mcp: Arc<dyn McpClient>,
    /// Backend for model-judged triggers.
    pub backend: Option<Arc<dyn LLMBackend>>,
}

impl HandlerDeps {
    /// Wire the wiki-backed services; the tool list holds the built-in tools.
    pub fn new(workspaces: Arc<dyn WorkspaceService>, wiki: Arc<dyn WikiService>) -> Self {
        let tools = ToolRegistry::with_builtin_tools(workspaces.clone(), wiki.clone());
        Self {
            agent_definitions: Arc::new(tools),
            uri_loader: Arc::new(DefaultUriLoader::new(wiki)),
            workspaces,
            functions: Arc::new(StaticFunctionExecutor::default()),
            mcp: Arc::new(StaticMcpClient::default()),
            backend: None,
        }
    }

    pub fn with_agent_definitions(mut self, service: Arc<dyn AgentDefinitionService>) -> Self {
        self.agent_definitions = service;
        self
    }

    pub fn with_functions(mut self, functions: Arc<dyn FunctionExecutor>) -> Self {
        self.functions = functions;
        self
    }

    pub fn with_uri_loader(mut self, loader: Arc<dyn UriLoader>) -> Self {
        self.uri_loader = loader;
        self
    }

    pub fn with_mcp(mut self, mcp: Arc<dyn McpClient>) -> Self {
        self.mcp = mcp;
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn LLMBackend>) -> Self {
        self.backend = Some(backend);
        self
    }
}

impl Default for HandlerDeps {
    fn default() -> Self {
        Self::new(
            Arc::new(InMemoryWorkspaceService::default()),
            Arc::new(InMemoryWikiService::default()),
        )
    }
}

impl std::fmt::Debug for HandlerDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerDeps")
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .finish_non_exhaustive()
    }
}
