//! Trigger evaluation.
//!
//! A trigger gates whether a modification activates for the current turn.
//! Every condition that is set must pass:
//!
//! ```text
//! trigger ─▶ search? ─▶ filter? ─▶ randomChance? ─▶ model? ─▶ activate
//!              │           │            │              │
//!              └───────────┴────────────┴──────────────┴──▶ skip on first failure
//! ```
//!
//! The model judgment runs last so cheap checks can skip the backend call.

use std::sync::Arc;

use regex::RegexBuilder;

use crate::agent::{ModelTrigger, Trigger};
use crate::backend::{GenerationConfig, LLMBackend, collect_response};
use crate::types::FlatPrompt;

const DEFAULT_MODEL_SYSTEM_PROMPT: &str = "You decide whether an automation should run for the \
following conversation text. Answer with a single word: yes or no.";

const DEFAULT_MODEL_QUESTION: &str = "Should the automation run for this text?";

/// Evaluates triggers against a piece of text.
#[derive(Clone, Default)]
pub struct TriggerEvaluator {
    backend: Option<Arc<dyn LLMBackend>>,
}

impl TriggerEvaluator {
    pub fn new(backend: Option<Arc<dyn LLMBackend>>) -> Self {
        Self { backend }
    }

    /// Decide whether `trigger` activates for `text`.
    ///
    /// An absent trigger always activates. Never fails: a failing model call
    /// counts as "do not activate".
    pub async fn should_trigger(&self, trigger: Option<&Trigger>, text: &str) -> bool {
        let Some(trigger) = trigger else {
            return true;
        };

        if let Some(keyword) = trigger.search.as_deref().filter(|k| !k.is_empty()) {
            if !text.to_lowercase().contains(&keyword.to_lowercase()) {
                tracing::debug!(keyword, "Trigger keyword not present");
                return false;
            }
        }

        if let Some(pattern) = trigger.filter.as_deref().filter(|p| !p.is_empty()) {
            if !matches_filter(pattern, text) {
                tracing::debug!(pattern, "Trigger filter did not match");
                return false;
            }
        }

        if let Some(chance) = trigger.random_chance {
            let draw: f64 = rand::random();
            if draw >= chance {
                tracing::debug!(chance, draw, "Trigger random draw failed");
                return false;
            }
        }

        if let Some(model) = &trigger.model {
            return self.ask_model(model, text).await;
        }

        true
    }

    async fn ask_model(&self, model: &ModelTrigger, text: &str) -> bool {
        let Some(backend) = &self.backend else {
            tracing::warn!("Model trigger configured but no backend available");
            return false;
        };

        let system = model
            .system
            .as_deref()
            .unwrap_or(DEFAULT_MODEL_SYSTEM_PROMPT);
        let question = model.user.as_deref().unwrap_or(DEFAULT_MODEL_QUESTION);
        let messages = vec![
            FlatPrompt::system(system),
            FlatPrompt::user(format!("{}\n\n{}", question, text)),
        ];
        let config = GenerationConfig {
            preset: model.preset.clone(),
            ..Default::default()
        };

        let answer = match backend.generate(messages, config).await {
            Ok(stream) => collect_response(stream).await,
            Err(e) => Err(e),
        };

        match answer {
            Ok(answer) => {
                let decision = parse_judgment(&answer);
                tracing::debug!(backend = backend.name(), decision, "Model trigger judged");
                decision
            }
            Err(e) => {
                tracing::error!(error = %e, "Model trigger evaluation failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for TriggerEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerEvaluator")
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .finish()
    }
}

/// Case-insensitive pattern match; an invalid pattern falls back to a
/// literal substring check.
fn matches_filter(pattern: &str, text: &str) -> bool {
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(re) => re.is_match(text),
        Err(e) => {
            tracing::debug!(pattern, error = %e, "Invalid trigger filter, using substring match");
            text.to_lowercase().contains(&pattern.to_lowercase())
        }
    }
}

/// Read a yes/no answer; anything that is not clearly "yes" is "no".
fn parse_judgment(answer: &str) -> bool {
    let normalized = answer.trim().to_lowercase();
    let first = normalized
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| !w.is_empty())
        .unwrap_or("");
    matches!(first, "yes" | "true" | "y")
}
