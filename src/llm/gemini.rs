//! Gemini-family provider adapter.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorKind, OrchestratorError};

use super::client::{LLMClient, Params, ProviderModelInfo, ProviderResult, ProviderTokenCount, SafetyInfo};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiClient {
    model_name: String,
    api_key: String,
    base_url: String,
    http: Client,
}

impl GeminiClient {
    pub fn new(model_name: String, api_key: String, api_endpoint: Option<String>) -> Self {
        Self {
            model_name,
            api_key,
            base_url: api_endpoint.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            http: Client::new(),
        }
    }

    fn model_path(&self) -> String {
        if self.model_name.starts_with("models/") {
            self.model_name.clone()
        } else {
            format!("models/{}", self.model_name)
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
    #[serde(default)]
    safety_ratings: Vec<GeminiSafetyRating>,
}

#[derive(Debug, Deserialize)]
struct GeminiSafetyRating {
    category: String,
    probability: String,
    #[serde(default)]
    blocked: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    #[allow(dead_code)]
    prompt_token_count: Option<i32>,
    #[allow(dead_code)]
    candidates_token_count: Option<i32>,
    total_token_count: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiError,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    code: u32,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCountTokensResponse {
    total_tokens: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiModelInfoResponse {
    input_token_limit: Option<i32>,
    output_token_limit: Option<i32>,
}

fn map_http_error(status: reqwest::StatusCode, body: &str) -> OrchestratorError {
    if let Ok(parsed) = serde_json::from_str::<GeminiErrorResponse>(body) {
        let kind = match parsed.error.code {
            401 | 403 => ErrorKind::Auth,
            400 => ErrorKind::InvalidRequest,
            404 => ErrorKind::NotFound,
            429 => ErrorKind::RateLimit,
            500..=599 => ErrorKind::Server,
            _ => ErrorKind::Unknown,
        };
        return OrchestratorError::new(kind, parsed.error.message);
    }
    let kind = match status.as_u16() {
        401 | 403 => ErrorKind::Auth,
        400 => ErrorKind::InvalidRequest,
        404 => ErrorKind::NotFound,
        429 => ErrorKind::RateLimit,
        500..=599 => ErrorKind::Server,
        _ => ErrorKind::Unknown,
    };
    OrchestratorError::new(kind, format!("HTTP {status}: {body}"))
}

fn generation_config_from_params(params: &Params) -> Option<GeminiGenerationConfig> {
    if params.is_empty() {
        return None;
    }
    let mut config = GeminiGenerationConfig::default();
    if let Some(v) = params.get("temperature").and_then(number) {
        config.temperature = Some(v);
    }
    if let Some(v) = params.get("top_p").and_then(number) {
        config.top_p = Some(v);
    }
    if let Some(v) = params
        .get("max_output_tokens")
        .or_else(|| params.get("max_tokens"))
        .and_then(number)
    {
        config.max_output_tokens = Some(v as i64);
    }
    Some(config)
}

/// Accepts either a JSON float or integer; drops anything else instead of
/// failing the whole request (§4.1).
fn number(value: &Value) -> Option<f64> {
    match value.as_f64() {
        Some(v) => Some(v),
        None => {
            tracing::debug!(?value, "dropping ill-typed generation parameter");
            None
        }
    }
}

#[async_trait]
impl LLMClient for GeminiClient {
    async fn generate(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
        params: &Params,
    ) -> Result<ProviderResult, OrchestratorError> {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: prompt.to_string() }],
            }],
            generation_config: generation_config_from_params(params),
        };

        let url = format!(
            "{}/{}:generateContent?key={}",
            self.base_url,
            self.model_path(),
            self.api_key
        );

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(OrchestratorError::new(ErrorKind::Cancelled, "generation cancelled"));
            }
            result = self.http.post(&url).json(&request).send() => result
                .map_err(|e| OrchestratorError::new(ErrorKind::Network, e.to_string()))?,
        };

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| OrchestratorError::new(ErrorKind::Network, e.to_string()))?;

        if !status.is_success() {
            return Err(map_http_error(status, &body));
        }

        let parsed: GeminiResponse = serde_json::from_str(&body)
            .map_err(|e| OrchestratorError::new(ErrorKind::Unknown, format!("failed to parse response: {e}")))?;

        let candidate = parsed.candidates.into_iter().next().unwrap_or_default();
        let content = candidate
            .content
            .map(|c| c.parts.into_iter().map(|p| p.text).collect::<Vec<_>>().join(""))
            .unwrap_or_default();

        let safety_info = candidate
            .safety_ratings
            .into_iter()
            .map(|r| SafetyInfo {
                category: r.category,
                blocked: r.blocked,
                score: match r.probability.as_str() {
                    "NEGLIGIBLE" => 0.0,
                    "LOW" => 0.33,
                    "MEDIUM" => 0.66,
                    "HIGH" => 1.0,
                    _ => 0.0,
                },
            })
            .collect();

        let token_count = parsed
            .usage_metadata
            .as_ref()
            .and_then(|u| u.total_token_count)
            .unwrap_or(0);

        Ok(ProviderResult {
            content,
            finish_reason: candidate.finish_reason.unwrap_or_default(),
            token_count,
            truncated: false,
            safety_info,
        })
    }

    async fn count_tokens(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
    ) -> Result<ProviderTokenCount, OrchestratorError> {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: prompt.to_string() }],
            }],
            generation_config: None,
        };
        let url = format!(
            "{}/{}:countTokens?key={}",
            self.base_url,
            self.model_path(),
            self.api_key
        );

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(OrchestratorError::new(ErrorKind::Cancelled, "count_tokens cancelled"));
            }
            result = self.http.post(&url).json(&request).send() => result
                .map_err(|e| OrchestratorError::new(ErrorKind::Network, e.to_string()))?,
        };

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| OrchestratorError::new(ErrorKind::Network, e.to_string()))?;
        if !status.is_success() {
            return Err(map_http_error(status, &body));
        }
        let parsed: GeminiCountTokensResponse = serde_json::from_str(&body)
            .map_err(|e| OrchestratorError::new(ErrorKind::Unknown, format!("failed to parse response: {e}")))?;
        Ok(ProviderTokenCount { total: parsed.total_tokens })
    }

    async fn describe_model(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ProviderModelInfo, OrchestratorError> {
        let url = format!("{}/{}?key={}", self.base_url, self.model_path(), self.api_key);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(OrchestratorError::new(ErrorKind::Cancelled, "describe_model cancelled"));
            }
            result = self.http.get(&url).send() => result
                .map_err(|e| OrchestratorError::new(ErrorKind::Network, e.to_string()))?,
        };

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| OrchestratorError::new(ErrorKind::Network, e.to_string()))?;
        if !status.is_success() {
            return Err(map_http_error(status, &body));
        }
        let parsed: GeminiModelInfoResponse = serde_json::from_str(&body)
            .map_err(|e| OrchestratorError::new(ErrorKind::Unknown, format!("failed to parse response: {e}")))?;

        Ok(ProviderModelInfo {
            name: self.model_name.clone(),
            input_token_limit: parsed.input_token_limit.unwrap_or(32_768),
            output_token_limit: parsed.output_token_limit.unwrap_or(8192),
        })
    }

    async fn close(&self) -> Result<(), OrchestratorError> {
        Ok(())
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_config_widens_integer_temperature() {
        let mut params = Params::new();
        params.insert("temperature".to_string(), serde_json::json!(1));
        let config = generation_config_from_params(&params).unwrap();
        assert_eq!(config.temperature, Some(1.0));
    }

    #[test]
    fn ill_typed_value_is_dropped_not_fatal() {
        let mut params = Params::new();
        params.insert("temperature".to_string(), serde_json::json!("hot"));
        let config = generation_config_from_params(&params).unwrap();
        assert_eq!(config.temperature, None);
    }

    #[test]
    fn model_path_prefixes_models_once() {
        let client = GeminiClient::new("gemini-1.5-flash".into(), "key".into(), None);
        assert_eq!(client.model_path(), "models/gemini-1.5-flash");
        let client = GeminiClient::new("models/gemini-1.5-flash".into(), "key".into(), None);
        assert_eq!(client.model_path(), "models/gemini-1.5-flash");
    }

    #[test]
    fn maps_http_status_to_error_kind() {
        let err = map_http_error(reqwest::StatusCode::TOO_MANY_REQUESTS, "{}");
        assert_eq!(err.kind, ErrorKind::RateLimit);
        let err = map_http_error(reqwest::StatusCode::UNAUTHORIZED, "{}");
        assert_eq!(err.kind, ErrorKind::Auth);
    }

    #[tokio::test]
    async fn generate_parses_a_successful_response_from_a_stub_server() {
        use wiremock::matchers::{method, path_regex};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r".*:generateContent$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": {"parts": [{"text": "hello from gemini"}]},
                    "finishReason": "STOP",
                    "safetyRatings": [],
                }],
                "usageMetadata": {"totalTokenCount": 7},
            })))
            .mount(&server)
            .await;

        let client = GeminiClient::new("gemini-1.5-flash".into(), "key".into(), Some(server.uri()));
        let cancel = CancellationToken::new();
        let result = client.generate(&cancel, "hi", &Params::new()).await.unwrap();

        assert_eq!(result.content, "hello from gemini");
        assert_eq!(result.token_count, 7);
    }

    #[tokio::test]
    async fn generate_maps_a_429_response_to_rate_limit() {
        use wiremock::matchers::{method, path_regex};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r".*:generateContent$"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": {"code": 429, "message": "rate limited"}
            })))
            .mount(&server)
            .await;

        let client = GeminiClient::new("gemini-1.5-flash".into(), "key".into(), Some(server.uri()));
        let cancel = CancellationToken::new();
        let err = client.generate(&cancel, "hi", &Params::new()).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::RateLimit);
    }
}
