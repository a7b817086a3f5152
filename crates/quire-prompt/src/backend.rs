//! Language model backend abstraction.
//!
//! The engine never talks to a provider directly. Model-judged triggers go
//! through [`LLMBackend`], an opaque streaming call that yields incremental
//! text followed by a terminal `done` event carrying the full text.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use crate::error::{PromptError, Result};
use crate::types::FlatPrompt;

/// A streaming response from an LLM backend.
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<GenerationEvent>> + Send + 'static>>;

/// Status of a generation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
    /// Incremental text.
    Update,
    /// Generation finished; content is the full text.
    Done,
    /// Generation failed; content is the error message.
    Error,
}

/// One event of a generation stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationEvent {
    pub status: GenerationStatus,
    pub content: Option<String>,
}

impl GenerationEvent {
    pub fn update(delta: impl Into<String>) -> Self {
        Self {
            status: GenerationStatus::Update,
            content: Some(delta.into()),
        }
    }

    pub fn done(full_text: impl Into<String>) -> Self {
        Self {
            status: GenerationStatus::Done,
            content: Some(full_text.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: GenerationStatus::Error,
            content: Some(message.into()),
        }
    }
}

/// Per-call generation settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationConfig {
    /// Provider/model preset name, backend-specific.
    pub preset: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Trait for LLM backend providers.
#[async_trait]
pub trait LLMBackend: Send + Sync {
    /// Start a generation and return its event stream.
    async fn generate(
        &self,
        messages: Vec<FlatPrompt>,
        config: GenerationConfig,
    ) -> Result<ResponseStream>;

    /// Get the name of this backend.
    fn name(&self) -> &str;
}

/// Drain a generation stream until its `done` event and return the full text.
///
/// A stream that ends without `done` yields the concatenated updates.
pub async fn collect_response(mut stream: ResponseStream) -> Result<String> {
    let mut accumulated = String::new();
    while let Some(event) = stream.next().await {
        let event = event?;
        match event.status {
            GenerationStatus::Update => {
                if let Some(delta) = event.content {
                    accumulated.push_str(&delta);
                }
            }
            GenerationStatus::Done => return Ok(event.content.unwrap_or(accumulated)),
            GenerationStatus::Error => {
                return Err(PromptError::Backend(
                    event
                        .content
                        .unwrap_or_else(|| "generation failed".to_string()),
                ));
            }
        }
    }
    tracing::debug!(
        length = accumulated.len(),
        "Generation stream ended without a done event"
    );
    Ok(accumulated)
}

/// A mock backend for testing purposes.
///
/// Returns pre-configured texts in order, streamed word by word. If more
/// requests are made than responses available, an error is returned.
#[derive(Debug, Default)]
pub struct MockBackend {
    responses: Mutex<VecDeque<String>>,
    request_log: Mutex<Vec<Vec<FlatPrompt>>>,
}

impl MockBackend {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            request_log: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock backend with a single text response.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self::new(vec![text.into()])
    }

    /// Messages of every request made so far.
    pub fn requests(&self) -> Vec<Vec<FlatPrompt>> {
        self.request_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.request_log.lock().map(|log| log.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LLMBackend for MockBackend {
    async fn generate(
        &self,
        messages: Vec<FlatPrompt>,
        _config: GenerationConfig,
    ) -> Result<ResponseStream> {
        if let Ok(mut log) = self.request_log.lock() {
            log.push(messages);
        }

        let text = self
            .responses
            .lock()
            .map_err(|e| PromptError::Internal(e.to_string()))?
            .pop_front()
            .ok_or_else(|| {
                PromptError::Backend("MockBackend: no more responses available".to_string())
            })?;

        let mut events: Vec<Result<GenerationEvent>> = text
            .split_inclusive(' ')
            .map(|chunk| Ok(GenerationEvent::update(chunk)))
            .collect();
        events.push(Ok(GenerationEvent::done(text)));

        Ok(Box::pin(futures::stream::iter(events)))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
