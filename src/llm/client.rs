//! The provider-agnostic LLM client contract (§4.1).
//!
//! Every backend — Gemini-family, OpenAI-family, and any future provider —
//! implements [`LLMClient`] directly so the rest of the core never matches
//! on a provider-specific type.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::error::OrchestratorError;

/// Generation parameters, keyed by the recognized names (`temperature`,
/// `top_p`, `max_tokens`/`max_output_tokens`, `presence_penalty`,
/// `frequency_penalty`). Unknown keys are forwarded unchanged by adapters.
pub type Params = Map<String, Value>;

/// Right-biased merge: `overrides` wins on key collision. Used to layer
/// request-time parameters over the registry's per-model defaults.
pub fn merge_params(defaults: &Params, overrides: &Params) -> Params {
    let mut merged = defaults.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// A safety classification attached to a candidate response.
#[derive(Debug, Clone)]
pub struct SafetyInfo {
    pub category: String,
    pub blocked: bool,
    pub score: f32,
}

/// What a successful `generate` call returns. If `content` is empty the
/// caller must inspect `finish_reason` and `safety_info` to classify the
/// failure (§3 ProviderResult invariant).
#[derive(Debug, Clone)]
pub struct ProviderResult {
    pub content: String,
    pub finish_reason: String,
    pub token_count: i32,
    pub truncated: bool,
    pub safety_info: Vec<SafetyInfo>,
}

#[derive(Debug, Clone, Copy)]
pub struct ProviderTokenCount {
    pub total: i32,
}

#[derive(Debug, Clone)]
pub struct ProviderModelInfo {
    pub name: String,
    pub input_token_limit: i32,
    pub output_token_limit: i32,
}

/// Uniform capability surface over heterogeneous backends.
///
/// Every operation is cancellable through `cancel`; cancellation surfaces
/// as [`crate::error::ErrorKind::Cancelled`]. Implementations need only be
/// safe to call serially on a single instance — each model unit owns its
/// client exclusively.
#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn generate(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
        params: &Params,
    ) -> Result<ProviderResult, OrchestratorError>;

    async fn count_tokens(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
    ) -> Result<ProviderTokenCount, OrchestratorError>;

    async fn describe_model(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ProviderModelInfo, OrchestratorError>;

    /// Releases network resources. Must be idempotent.
    async fn close(&self) -> Result<(), OrchestratorError>;

    fn model_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn override_wins_on_key_collision() {
        let mut defaults = Params::new();
        defaults.insert("temperature".into(), json!(0.2));
        defaults.insert("top_p".into(), json!(0.9));

        let mut overrides = Params::new();
        overrides.insert("temperature".into(), json!(0.9));

        let merged = merge_params(&defaults, &overrides);
        assert_eq!(merged["temperature"], json!(0.9));
        assert_eq!(merged["top_p"], json!(0.9));
    }
}
