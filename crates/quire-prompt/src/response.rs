//! Response dynamic modifications.
//!
//! After the model answers, the agent's response placeholders are cloned and
//! passed through the response modifications in declaration order.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::agent::{
    FullReplacementSource, Response, ResponseDynamicModification, ResponseModificationType,
};
use crate::error::Result;

/// Applies one kind of response modification.
#[async_trait]
pub trait ResponseModificationHandler: Send + Sync {
    async fn apply(
        &self,
        responses: &mut Vec<Response>,
        modification: &ResponseDynamicModification,
        llm_response: &str,
    ) -> Result<()>;
}

/// Replaces a response's text with the raw model output.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseFullReplacementHandler;

#[async_trait]
impl ResponseModificationHandler for ResponseFullReplacementHandler {
    async fn apply(
        &self,
        responses: &mut Vec<Response>,
        modification: &ResponseDynamicModification,
        llm_response: &str,
    ) -> Result<()> {
        let Some(param) = &modification.full_replacement_param else {
            tracing::debug!(id = %modification.id, "fullReplacement without param, skipping");
            return Ok(());
        };
        if param.source_type != FullReplacementSource::LlmResponse {
            tracing::debug!(
                id = %modification.id,
                "Only llmResponse replacement applies to responses"
            );
            return Ok(());
        }

        match responses.iter_mut().find(|r| r.id == param.target_id) {
            Some(response) => response.text = Some(llm_response.to_string()),
            None => tracing::warn!(
                id = %modification.id,
                target_id = %param.target_id,
                "Response target not found"
            ),
        }
        Ok(())
    }
}

/// Response handlers keyed by modification type.
#[derive(Default)]
pub struct ResponseModificationRegistry {
    handlers: RwLock<HashMap<ResponseModificationType, Arc<dyn ResponseModificationHandler>>>,
}

impl ResponseModificationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin_handlers() -> Self {
        let registry = Self::new();
        registry.register(
            ResponseModificationType::FullReplacement,
            Arc::new(ResponseFullReplacementHandler),
        );
        registry
    }

    pub fn register(
        &self,
        kind: ResponseModificationType,
        handler: Arc<dyn ResponseModificationHandler>,
    ) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, handler);
    }

    pub fn get(
        &self,
        kind: ResponseModificationType,
    ) -> Option<Arc<dyn ResponseModificationHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
    }

    pub fn clear(&self) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl std::fmt::Debug for ResponseModificationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<&'static str> = self
            .handlers
            .read()
            .map(|h| h.keys().map(|k| k.as_str()).collect())
            .unwrap_or_default();
        f.debug_struct("ResponseModificationRegistry")
            .field("handlers", &kinds)
            .finish()
    }
}

/// Clone `responses` and apply `modifications` in order.
///
/// Missing handlers and handler errors are logged and skipped.
pub async fn apply_response_modifications(
    registry: &ResponseModificationRegistry,
    responses: &[Response],
    modifications: &[ResponseDynamicModification],
    llm_response: &str,
) -> Vec<Response> {
    let mut processed = responses.to_vec();
    for modification in modifications {
        let kind = modification.response_dynamic_modification_type;
        let Some(handler) = registry.get(kind) else {
            tracing::warn!(id = %modification.id, kind = %kind, "No response handler registered");
            continue;
        };
        if let Err(e) = handler
            .apply(&mut processed, modification, llm_response)
            .await
        {
            tracing::error!(id = %modification.id, error = %e, "Response modification failed");
        }
    }
    processed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::FullReplacementParam;

    fn responses() -> Vec<Response> {
        vec![Response::new("llm-response"), Response::new("other")]
    }

    #[tokio::test]
    async fn test_llm_response_replacement() {
        let registry = ResponseModificationRegistry::with_builtin_handlers();
        let original = responses();
        let processed = apply_response_modifications(
            &registry,
            &original,
            &[ResponseDynamicModification::full_replacement(
                "r",
                FullReplacementParam::llm_response("llm-response"),
            )],
            "The answer is 4.",
        )
        .await;

        assert_eq!(processed[0].text.as_deref(), Some("The answer is 4."));
        assert!(processed[1].text.is_none());
        assert!(original[0].text.is_none());
    }

    #[tokio::test]
    async fn test_missing_target_and_history_source_are_noops() {
        let registry = ResponseModificationRegistry::with_builtin_handlers();
        let processed = apply_response_modifications(
            &registry,
            &responses(),
            &[
                ResponseDynamicModification::full_replacement(
                    "a",
                    FullReplacementParam::llm_response("missing"),
                ),
                ResponseDynamicModification::full_replacement(
                    "b",
                    FullReplacementParam::history("llm-response"),
                ),
            ],
            "text",
        )
        .await;
        assert_eq!(processed, responses());
    }

    #[tokio::test]
    async fn test_missing_handler_is_skipped() {
        let registry = ResponseModificationRegistry::new();
        let processed = apply_response_modifications(
            &registry,
            &responses(),
            &[ResponseDynamicModification::full_replacement(
                "r",
                FullReplacementParam::llm_response("llm-response"),
            )],
            "text",
        )
        .await;
        assert!(processed[0].text.is_none());
    }
}
