pub mod client;
pub mod gemini;
pub mod openai;
pub mod registry;

pub use client::{
    merge_params, LLMClient, Params, ProviderModelInfo, ProviderResult, ProviderTokenCount,
    SafetyInfo,
};
pub use gemini::GeminiClient;
pub use openai::OpenAIClient;
pub use registry::{ClientConfig, ClientFactory, ModelDefinition, Provider, Registry};
