//! OpenAI-family provider adapter (chat completions endpoint).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorKind, OrchestratorError};

use super::client::{LLMClient, Params, ProviderModelInfo, ProviderResult, ProviderTokenCount};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAIClient {
    model_name: String,
    api_key: String,
    base_url: String,
    http: Client,
}

impl OpenAIClient {
    pub fn new(model_name: String, api_key: String, api_endpoint: Option<String>) -> Self {
        Self {
            model_name,
            api_key,
            base_url: api_endpoint.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            http: Client::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[allow(dead_code)]
    prompt_tokens: i32,
    #[allow(dead_code)]
    completion_tokens: i32,
    total_tokens: i32,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIError,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelInfoResponse {
    id: String,
}

fn map_http_error(status: reqwest::StatusCode, body: &str) -> OrchestratorError {
    if let Ok(parsed) = serde_json::from_str::<OpenAIErrorResponse>(body) {
        let kind = match (status.as_u16(), parsed.error.code.as_deref()) {
            (401, _) => ErrorKind::Auth,
            (403, _) => ErrorKind::Auth,
            (400, Some("context_length_exceeded")) => ErrorKind::InputLimit,
            (400, _) => ErrorKind::InvalidRequest,
            (404, _) => ErrorKind::NotFound,
            (429, _) => ErrorKind::RateLimit,
            (500..=599, _) => ErrorKind::Server,
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

fn number(value: &Value) -> Option<f64> {
    match value.as_f64() {
        Some(v) => Some(v),
        None => {
            tracing::debug!(?value, "dropping ill-typed generation parameter");
            None
        }
    }
}

fn build_request<'a>(model: &'a str, prompt: &str, params: &Params) -> ChatRequest<'a> {
    ChatRequest {
        model,
        messages: vec![ChatMessage { role: "user".to_string(), content: prompt.to_string() }],
        temperature: params.get("temperature").and_then(number),
        top_p: params.get("top_p").and_then(number),
        max_tokens: params
            .get("max_tokens")
            .or_else(|| params.get("max_output_tokens"))
            .and_then(number)
            .map(|v| v as i64),
        presence_penalty: params.get("presence_penalty").and_then(number),
        frequency_penalty: params.get("frequency_penalty").and_then(number),
    }
}

#[async_trait]
impl LLMClient for OpenAIClient {
    async fn generate(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
        params: &Params,
    ) -> Result<ProviderResult, OrchestratorError> {
        let request = build_request(&self.model_name, prompt, params);
        let url = format!("{}/chat/completions", self.base_url);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(OrchestratorError::new(ErrorKind::Cancelled, "generation cancelled"));
            }
            result = self.http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send() => result.map_err(|e| OrchestratorError::new(ErrorKind::Network, e.to_string()))?,
        };

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| OrchestratorError::new(ErrorKind::Network, e.to_string()))?;

        if !status.is_success() {
            return Err(map_http_error(status, &body));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| OrchestratorError::new(ErrorKind::Unknown, format!("failed to parse response: {e}")))?;

        let choice = parsed.choices.into_iter().next();
        let (content, finish_reason) = match choice {
            Some(c) => (c.message.content, c.finish_reason.unwrap_or_default()),
            None => (String::new(), String::new()),
        };
        let truncated = finish_reason == "length";
        let token_count = parsed.usage.as_ref().map(|u| u.total_tokens).unwrap_or(0);

        Ok(ProviderResult {
            content,
            finish_reason,
            token_count,
            truncated,
            safety_info: Vec::new(),
        })
    }

    async fn count_tokens(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
    ) -> Result<ProviderTokenCount, OrchestratorError> {
        // OpenAI's chat models have no public tokenize endpoint; approximate
        // with the 4-characters-per-token heuristic OpenAI itself documents.
        let _ = cancel;
        Ok(ProviderTokenCount { total: (prompt.len() as i32 + 3) / 4 })
    }

    async fn describe_model(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ProviderModelInfo, OrchestratorError> {
        let url = format!("{}/models/{}", self.base_url, self.model_name);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(OrchestratorError::new(ErrorKind::Cancelled, "describe_model cancelled"));
            }
            result = self.http.get(&url).bearer_auth(&self.api_key).send() => result
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
        let parsed: ModelInfoResponse = serde_json::from_str(&body)
            .map_err(|e| OrchestratorError::new(ErrorKind::Unknown, format!("failed to parse response: {e}")))?;

        let (input_limit, output_limit) = known_limits(&parsed.id);
        Ok(ProviderModelInfo {
            name: parsed.id,
            input_token_limit: input_limit,
            output_token_limit: output_limit,
        })
    }

    async fn close(&self) -> Result<(), OrchestratorError> {
        Ok(())
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

fn known_limits(model: &str) -> (i32, i32) {
    if model.starts_with("gpt-4o") {
        (128_000, 16_384)
    } else if model.starts_with("gpt-4-turbo") {
        (128_000, 4_096)
    } else if model.starts_with("gpt-4") {
        (8_192, 4_096)
    } else if model.starts_with("gpt-3.5-turbo") {
        (16_385, 4_096)
    } else {
        (4_096, 4_096)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_request_carries_known_params() {
        let mut params = Params::new();
        params.insert("temperature".to_string(), serde_json::json!(0.3));
        params.insert("max_tokens".to_string(), serde_json::json!(256));
        let request = build_request("gpt-4o", "hello", &params);
        assert_eq!(request.temperature, Some(0.3));
        assert_eq!(request.max_tokens, Some(256));
    }

    #[test]
    fn maps_context_length_exceeded_to_input_limit() {
        let body = r#"{"error":{"message":"too long","code":"context_length_exceeded"}}"#;
        let err = map_http_error(reqwest::StatusCode::BAD_REQUEST, body);
        assert_eq!(err.kind, ErrorKind::InputLimit);
    }

    #[test]
    fn known_limits_cover_catalog_models() {
        assert_eq!(known_limits("gpt-4o"), (128_000, 16_384));
        assert_eq!(known_limits("gpt-3.5-turbo"), (16_385, 4_096));
    }

    #[tokio::test]
    async fn generate_parses_a_successful_response_from_a_stub_server() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{
                    "message": {"role": "assistant", "content": "hello from openai"},
                    "finish_reason": "stop",
                }],
                "usage": {"prompt_tokens": 3, "completion_tokens": 4, "total_tokens": 7},
            })))
            .mount(&server)
            .await;

        let client = OpenAIClient::new("gpt-4o".into(), "key".into(), Some(server.uri()));
        let cancel = CancellationToken::new();
        let result = client.generate(&cancel, "hi", &Params::new()).await.unwrap();

        assert_eq!(result.content, "hello from openai");
        assert_eq!(result.token_count, 7);
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn generate_maps_a_401_response_to_auth() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": {"message": "invalid api key", "code": null}
            })))
            .mount(&server)
            .await;

        let client = OpenAIClient::new("gpt-4o".into(), "bad-key".into(), Some(server.uri()));
        let cancel = CancellationToken::new();
        let err = client.generate(&cancel, "hi", &Params::new()).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::Auth);
    }
}
