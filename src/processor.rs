//! Per-model processing pipeline (§4.4): client init, token precheck,
//! optional interactive confirmation, generation, response validation,
//! atomic file write, audit.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::audit::{AuditEntry, AuditSink, AuditStatus, TokenCounts};
use crate::error::{ErrorKind, OrchestratorError};
use crate::llm::{merge_params, ClientConfig, Params, ProviderResult, Registry};

/// Abstracts the interactive yes/no confirmation read so tests can supply a
/// canned answer instead of real stdin (§9 open question).
pub trait ConfirmationPrompt: Send + Sync {
    fn confirm(&self, message: &str) -> bool;
}

/// Reads a line from stdin; `y`/`yes` (case-insensitive) means proceed.
pub struct StdinConfirmationPrompt;

impl ConfirmationPrompt for StdinConfirmationPrompt {
    fn confirm(&self, message: &str) -> bool {
        dialoguer::Confirm::new()
            .with_prompt(message)
            .default(false)
            .interact()
            .unwrap_or(false)
    }
}

/// Pre-generation token estimate against the model's declared input cap.
#[derive(Debug, Clone)]
pub struct TokenResult {
    pub token_count: i32,
    pub input_limit: i32,
    pub exceeds_limit: bool,
    pub limit_error: String,
    pub percentage: f64,
    pub source: &'static str,
}

/// Owns its collaborators via `Arc` so a unit can be moved into a spawned
/// `tokio::task` without borrowing the orchestrator (§4.5 step 6).
#[derive(Clone)]
pub struct ModelProcessor {
    pub audit: Arc<dyn AuditSink>,
    pub confirmation: Arc<dyn ConfirmationPrompt>,
}

impl ModelProcessor {
    pub async fn process(
        &self,
        cancel: &CancellationToken,
        model_name: &str,
        prompt: Arc<str>,
        api_key: &str,
        api_endpoint: Option<&str>,
        confirm_tokens: u32,
        output_dir: &Path,
    ) -> Result<(), OrchestratorError> {
        let started = Instant::now();
        self.audit.log(AuditEntry::new(
            "ProcessModelStart",
            AuditStatus::InProgress,
            format!("processing model {model_name}"),
        ));

        let (definition, factory) = Registry::resolve(model_name).ok_or_else(|| {
            OrchestratorError::new(ErrorKind::NotFound, "model is not registered and its prefix is unrecognized")
                .with_model(model_name)
        })?;

        let client = factory(ClientConfig { model_name, api_key, api_endpoint });

        let result = self
            .run_pipeline(cancel, model_name, client.as_ref(), &definition, prompt, confirm_tokens, output_dir)
            .await;

        if let Err(close_err) = client.close().await {
            tracing::warn!(model = model_name, error = %close_err, "client close failed");
        }

        match &result {
            Ok(()) => {
                self.audit.log(
                    AuditEntry::new("ProcessModelEnd", AuditStatus::Success, "completed")
                        .with_duration_ms(started.elapsed().as_millis() as i64),
                );
            }
            Err(err) => {
                self.audit.log(
                    AuditEntry::new("ProcessModelEnd", AuditStatus::Failure, err.to_string())
                        .with_error(err.message.clone(), err.audit_type())
                        .with_duration_ms(started.elapsed().as_millis() as i64),
                );
            }
        }

        result
    }

    async fn run_pipeline(
        &self,
        cancel: &CancellationToken,
        model_name: &str,
        client: &dyn crate::llm::LLMClient,
        definition: &crate::llm::ModelDefinition,
        prompt: Arc<str>,
        confirm_tokens: u32,
        output_dir: &Path,
    ) -> Result<(), OrchestratorError> {
        // Step 2: token precheck.
        let token_count = client
            .count_tokens(cancel, &prompt)
            .await
            .map_err(|e| e.with_model(model_name))?;
        let (input_limit, source) = if definition.context_window > 0 {
            (definition.context_window, "registry")
        } else {
            let info = client.describe_model(cancel).await.map_err(|e| e.with_model(model_name))?;
            (info.input_token_limit, "client")
        };
        let percentage = if input_limit > 0 {
            (token_count.total as f64 / input_limit as f64) * 100.0
        } else {
            0.0
        };
        let exceeds_limit = token_count.total > input_limit;
        let token_result = TokenResult {
            token_count: token_count.total,
            input_limit,
            exceeds_limit,
            limit_error: if exceeds_limit {
                format!("estimated {} tokens exceeds input limit of {}", token_count.total, input_limit)
            } else {
                String::new()
            },
            percentage,
            source,
        };
        if token_result.exceeds_limit {
            tracing::warn!(model = model_name, limit_error = %token_result.limit_error, "token precheck exceeded input limit");
            self.audit.log(
                AuditEntry::new("TokenLimitExceededError", AuditStatus::Failure, token_result.limit_error.clone())
                    .with_token_counts(TokenCounts {
                        prompt_tokens: token_result.token_count,
                        output_tokens: 0,
                        total_tokens: token_result.token_count,
                        limit: Some(token_result.input_limit),
                    }),
            );
        }

        // Step 3: interactive confirmation.
        if confirm_tokens > 0 && token_result.token_count.max(0) as u32 >= confirm_tokens {
            let proceed = self.confirmation.confirm(&format!(
                "About to send ~{} tokens to {model_name}. Continue?",
                token_result.token_count
            ));
            if !proceed {
                self.audit.log(AuditEntry::new(
                    "ConfirmationDeclined",
                    AuditStatus::Success,
                    "user declined token confirmation, skipping model",
                ));
                return Ok(());
            }
        }

        // Step 4: generate.
        let params = merge_params(&Registry::parameters(model_name), &Params::new());
        self.audit.log(AuditEntry::new("GenerateContentStart", AuditStatus::InProgress, "generating"));
        let generate_started = Instant::now();
        let result = client
            .generate(cancel, &prompt, &params)
            .await
            .map_err(|e| e.with_model(model_name))?;
        let generate_duration = generate_started.elapsed();

        // Step 5: response validation.
        let content = validate_response(&result, model_name)?;

        // Step 6: filename derivation.
        let path = output_dir.join(format!("{}.md", sanitize_filename(model_name)));

        // Step 7: atomic write.
        write_atomic(&path, &content).map_err(|e| {
            OrchestratorError::new(ErrorKind::Unknown, format!("failed to write output: {e}")).with_model(model_name)
        })?;

        // Step 8: audit success.
        self.audit.log(
            AuditEntry::new("GenerateContentEnd", AuditStatus::Success, "generated")
                .with_duration_ms(generate_duration.as_millis() as i64)
                .with_token_counts(TokenCounts {
                    prompt_tokens: token_result.token_count,
                    output_tokens: result.token_count,
                    total_tokens: token_result.token_count + result.token_count,
                    limit: Some(token_result.input_limit),
                }),
        );
        self.audit.log(AuditEntry::new(
            "SaveOutputEnd",
            AuditStatus::Success,
            format!("wrote {} bytes to {}", content.len(), path.display()),
        ));

        Ok(())
    }
}

/// Validation rules in order (§4.4 step 5).
fn validate_response(result: &ProviderResult, model_name: &str) -> Result<String, OrchestratorError> {
    let any_blocked = result.safety_info.iter().any(|s| s.blocked);

    if result.content.is_empty() && any_blocked {
        let categories: Vec<String> = result
            .safety_info
            .iter()
            .filter(|s| s.blocked)
            .map(|s| s.category.clone())
            .collect();
        return Err(OrchestratorError::new(ErrorKind::SafetyBlocked, "response was blocked by safety filters")
            .with_model(model_name)
            .with_blocked_categories(categories));
    }

    if !result.content.is_empty() && result.content.trim().is_empty() {
        return Err(OrchestratorError::new(ErrorKind::WhitespaceContent, "response contained only whitespace")
            .with_model(model_name));
    }

    if result.content.is_empty() {
        let message = if result.finish_reason.is_empty() {
            "model returned an empty response".to_string()
        } else {
            format!("model returned an empty response (finish_reason: {})", result.finish_reason)
        };
        return Err(OrchestratorError::new(ErrorKind::EmptyResponse, message).with_model(model_name));
    }

    Ok(result.content.clone())
}

/// Replaces characters that are invalid or awkward in filenames across
/// platforms with `-`.
fn sanitize_filename(model_name: &str) -> String {
    const INVALID: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];
    model_name.chars().map(|c| if INVALID.contains(&c) { '-' } else { c }).collect()
}

/// Writes to a sibling temp file, then renames over the final path. On
/// failure the temp file is removed before propagating the error.
fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let temp_path = sibling_temp_path(path);
    if let Err(e) = std::fs::write(&temp_path, content) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }
    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }
    Ok(())
}

fn sibling_temp_path(path: &Path) -> PathBuf {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("output.md");
    let suffix = uuid::Uuid::new_v4();
    path.with_file_name(format!("{file_name}.tmp-{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::SafetyInfo;

    struct AlwaysConfirm;
    impl ConfirmationPrompt for AlwaysConfirm {
        fn confirm(&self, _message: &str) -> bool {
            true
        }
    }

    struct AlwaysDecline;
    impl ConfirmationPrompt for AlwaysDecline {
        fn confirm(&self, _message: &str) -> bool {
            false
        }
    }

    #[test]
    fn sanitize_filename_replaces_invalid_characters() {
        assert_eq!(sanitize_filename("gpt-4o"), "gpt-4o");
        assert_eq!(sanitize_filename("models/foo:bar"), "models-foo-bar");
    }

    #[test]
    fn write_atomic_leaves_no_temp_file_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.md");
        write_atomic(&path, "hello").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn validate_response_empty_with_blocked_safety_is_safety_blocked() {
        let result = ProviderResult {
            content: String::new(),
            finish_reason: "SAFETY".to_string(),
            token_count: 0,
            truncated: false,
            safety_info: vec![SafetyInfo { category: "HARASSMENT".to_string(), blocked: true, score: 1.0 }],
        };
        let err = validate_response(&result, "gpt-4o").unwrap_err();
        assert_eq!(err.kind, ErrorKind::SafetyBlocked);
        assert_eq!(err.blocked_categories, vec!["HARASSMENT".to_string()]);
    }

    #[test]
    fn validate_response_whitespace_only_is_whitespace_content() {
        let result = ProviderResult {
            content: "   \n  ".to_string(),
            finish_reason: "STOP".to_string(),
            token_count: 1,
            truncated: false,
            safety_info: Vec::new(),
        };
        let err = validate_response(&result, "gpt-4o").unwrap_err();
        assert_eq!(err.kind, ErrorKind::WhitespaceContent);
    }

    #[test]
    fn validate_response_empty_without_safety_is_empty_response() {
        let result = ProviderResult {
            content: String::new(),
            finish_reason: "STOP".to_string(),
            token_count: 0,
            truncated: false,
            safety_info: Vec::new(),
        };
        let err = validate_response(&result, "gpt-4o").unwrap_err();
        assert_eq!(err.kind, ErrorKind::EmptyResponse);
        assert!(err.message.contains("STOP"));
    }

    #[test]
    fn validate_response_success_returns_content() {
        let result = ProviderResult {
            content: "hello world".to_string(),
            finish_reason: "STOP".to_string(),
            token_count: 2,
            truncated: false,
            safety_info: Vec::new(),
        };
        assert_eq!(validate_response(&result, "gpt-4o").unwrap(), "hello world");
    }

    #[test]
    fn confirmation_prompt_trait_is_swappable() {
        assert!(AlwaysConfirm.confirm("x"));
        assert!(!AlwaysDecline.confirm("x"));
    }
}
