//! Process-wide catalog of known models plus prefix-based provider
//! detection for names the catalog doesn't carry (§4.2).

use std::collections::HashMap;
use std::sync::OnceLock;

use serde_json::json;

use super::client::{LLMClient, Params};
use super::gemini::GeminiClient;
use super::openai::OpenAIClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Gemini,
    OpenAI,
}

#[derive(Debug, Clone)]
pub struct ModelDefinition {
    pub name: String,
    pub provider: Provider,
    /// 0 means unknown; callers fall back to `describe_model` in that case.
    pub context_window: i32,
    pub max_output_tokens: i32,
    pub default_parameters: Params,
}

/// What a [`ClientFactory`] needs to build a concrete adapter.
pub struct ClientConfig<'a> {
    pub model_name: &'a str,
    pub api_key: &'a str,
    pub api_endpoint: Option<&'a str>,
}

pub type ClientFactory = fn(ClientConfig) -> Box<dyn LLMClient>;

fn gemini_factory(cfg: ClientConfig) -> Box<dyn LLMClient> {
    Box::new(GeminiClient::new(
        cfg.model_name.to_string(),
        cfg.api_key.to_string(),
        cfg.api_endpoint.map(str::to_string),
    ))
}

fn openai_factory(cfg: ClientConfig) -> Box<dyn LLMClient> {
    Box::new(OpenAIClient::new(
        cfg.model_name.to_string(),
        cfg.api_key.to_string(),
        cfg.api_endpoint.map(str::to_string),
    ))
}

fn factory_for(provider: Provider) -> ClientFactory {
    match provider {
        Provider::Gemini => gemini_factory,
        Provider::OpenAI => openai_factory,
    }
}

fn default_params(temperature: f64) -> Params {
    let mut params = Params::new();
    params.insert("temperature".to_string(), json!(temperature));
    params
}

fn catalog() -> &'static HashMap<&'static str, ModelDefinition> {
    static CATALOG: OnceLock<HashMap<&'static str, ModelDefinition>> = OnceLock::new();
    CATALOG.get_or_init(|| {
        let entries = [
            ModelDefinition {
                name: "gemini-1.5-pro".to_string(),
                provider: Provider::Gemini,
                context_window: 2_097_152,
                max_output_tokens: 8192,
                default_parameters: default_params(0.7),
            },
            ModelDefinition {
                name: "gemini-1.5-flash".to_string(),
                provider: Provider::Gemini,
                context_window: 1_048_576,
                max_output_tokens: 8192,
                default_parameters: default_params(0.7),
            },
            ModelDefinition {
                name: "gpt-4o".to_string(),
                provider: Provider::OpenAI,
                context_window: 128_000,
                max_output_tokens: 16_384,
                default_parameters: default_params(0.7),
            },
            ModelDefinition {
                name: "gpt-4-turbo".to_string(),
                provider: Provider::OpenAI,
                context_window: 128_000,
                max_output_tokens: 4096,
                default_parameters: default_params(0.7),
            },
            ModelDefinition {
                name: "gpt-3.5-turbo".to_string(),
                provider: Provider::OpenAI,
                context_window: 16_385,
                max_output_tokens: 4096,
                default_parameters: default_params(0.7),
            },
        ];
        entries.into_iter().map(|def| (leak(def.name.clone()), def)).collect()
    })
}

/// The catalog is built once and lives for the process lifetime, so leaking
/// the key string is equivalent to a `'static` literal without duplicating
/// every model name as a second constant.
fn leak(s: String) -> &'static str {
    Box::leak(s.into_boxed_str())
}

const OPENAI_PREFIXES: &[&str] = &[
    "gpt",
    "text-davinci",
    "davinci",
    "curie",
    "babbage",
    "ada",
    "text-embedding",
    "text-moderation",
    "whisper",
];

fn detect_provider_by_prefix(model_name: &str) -> Option<Provider> {
    if model_name.starts_with("gemini") {
        return Some(Provider::Gemini);
    }
    if OPENAI_PREFIXES.iter().any(|p| model_name.starts_with(p)) {
        return Some(Provider::OpenAI);
    }
    None
}

/// Read-only lookup over the catalog plus the prefix fallback. Safe to call
/// concurrently from any task.
pub struct Registry;

impl Registry {
    /// Resolves a model name to its definition and the factory that builds
    /// its client. Returns `None` when the name is in neither the catalog
    /// nor a recognized provider prefix (`ErrorKind::NotFound` at the
    /// caller).
    pub fn resolve(model_name: &str) -> Option<(ModelDefinition, ClientFactory)> {
        if let Some(def) = catalog().get(model_name) {
            return Some((def.clone(), factory_for(def.provider)));
        }
        let provider = detect_provider_by_prefix(model_name)?;
        Some((
            ModelDefinition {
                name: model_name.to_string(),
                provider,
                context_window: 0,
                max_output_tokens: 0,
                default_parameters: Params::new(),
            },
            factory_for(provider),
        ))
    }

    /// The registry's default generation parameters for a model, empty for
    /// names resolved only through the prefix fallback.
    pub fn parameters(model_name: &str) -> Params {
        catalog()
            .get(model_name)
            .map(|def| def.default_parameters.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_resolves_from_catalog() {
        let (def, _) = Registry::resolve("gpt-4o").unwrap();
        assert_eq!(def.provider, Provider::OpenAI);
        assert_eq!(def.context_window, 128_000);
    }

    #[test]
    fn unknown_gemini_prefixed_name_falls_back() {
        let (def, _) = Registry::resolve("gemini-2.0-experimental").unwrap();
        assert_eq!(def.provider, Provider::Gemini);
        assert_eq!(def.context_window, 0);
    }

    #[test]
    fn unrecognized_prefix_resolves_to_none() {
        assert!(Registry::resolve("claude-3-opus").is_none());
    }

    #[test]
    fn parameters_default_to_empty_outside_the_catalog() {
        assert!(Registry::parameters("gpt-5-preview").is_empty());
        assert!(!Registry::parameters("gpt-4o").is_empty());
    }
}
