//! Top-level state machine: gather → stitch → fan-out → aggregate (§4.5).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::audit::{AuditEntry, AuditSink, AuditStatus};
use crate::config::CliConfig;
use crate::context::{ContextGatherer, GatherOptions};
use crate::error::{AggregateError, ErrorKind, OrchestratorError};
use crate::processor::{ConfirmationPrompt, ModelProcessor};
use crate::prompt::PromptStitcher;
use crate::rate_limiter::RateLimiter;

pub struct Orchestrator {
    audit: Arc<dyn AuditSink>,
    rate_limiter: Arc<RateLimiter>,
    confirmation: Arc<dyn ConfirmationPrompt>,
}

impl Orchestrator {
    pub fn new(
        audit: Arc<dyn AuditSink>,
        rate_limiter: Arc<RateLimiter>,
        confirmation: Arc<dyn ConfirmationPrompt>,
    ) -> Self {
        Self { audit, rate_limiter, confirmation }
    }

    pub async fn run(&self, cancel: CancellationToken, config: &CliConfig) -> Result<(), AggregateError> {
        let run_started = Instant::now();
        self.audit.log(
            AuditEntry::new("ExecuteStart", AuditStatus::InProgress, "starting run")
                .with_inputs(to_map(json!({ "dry_run": config.dry_run }))),
        );

        let outcome = self.run_inner(&cancel, config).await;

        match &outcome {
            Ok(()) => {
                self.audit.log(
                    AuditEntry::new("ExecuteEnd", AuditStatus::Success, "run completed")
                        .with_duration_ms(run_started.elapsed().as_millis() as i64),
                );
            }
            Err(err) => {
                self.audit.log(
                    AuditEntry::new("ExecuteEnd", AuditStatus::Failure, err.to_string())
                        .with_duration_ms(run_started.elapsed().as_millis() as i64),
                );
            }
        }

        if let Err(e) = self.audit.close() {
            tracing::warn!(error = %e, "failed to close audit sink");
        }

        outcome
    }

    async fn run_inner(&self, cancel: &CancellationToken, config: &CliConfig) -> Result<(), AggregateError> {
        let output_dir = self.resolve_output_dir(config)?;

        let instructions = self.read_instructions(config)?;

        let gather_started = Instant::now();
        self.audit.log(AuditEntry::new("GatherContextStart", AuditStatus::InProgress, "gathering context"));
        let gather_options = GatherOptions {
            paths: config.paths.clone(),
            include: config.include.clone(),
            exclude: config.exclude.clone(),
            exclude_names: config.exclude_names.clone(),
        };
        let (files, stats) = match ContextGatherer::gather(cancel, &gather_options) {
            Ok(result) => {
                self.audit.log(
                    AuditEntry::new("GatherContextEnd", AuditStatus::Success, "gathered context")
                        .with_duration_ms(gather_started.elapsed().as_millis() as i64)
                        .with_outputs(to_map(json!({
                            "processed_count": result.1.processed_count,
                            "char_count": result.1.char_count,
                        }))),
                );
                result
            }
            Err(err) => {
                self.audit.log(
                    AuditEntry::new("GatherContextEnd", AuditStatus::Failure, err.to_string())
                        .with_error(err.message.clone(), err.audit_type())
                        .with_duration_ms(gather_started.elapsed().as_millis() as i64),
                );
                return Err(AggregateError::new(vec![err]));
            }
        };

        if config.dry_run {
            ContextGatherer::report_dry_run(&stats);
            return Ok(());
        }

        let prompt: Arc<str> = Arc::from(PromptStitcher::stitch(&instructions, &files, &config.format).as_str());

        self.fan_out(cancel, config, prompt, &output_dir).await
    }

    fn resolve_output_dir(&self, config: &CliConfig) -> Result<PathBuf, AggregateError> {
        let output_dir = if config.output_dir.as_os_str().is_empty() {
            let suffix = uuid::Uuid::new_v4();
            let timestamp = chrono::Utc::now().timestamp();
            PathBuf::from(format!("genorc-output-{timestamp}-{suffix}"))
        } else {
            config.output_dir.clone()
        };

        create_output_dir(&output_dir).map_err(|e| {
            let err = OrchestratorError::new(ErrorKind::Unknown, format!("failed to create output dir: {e}"));
            AggregateError::new(vec![err])
        })?;

        Ok(output_dir)
    }

    fn read_instructions(&self, config: &CliConfig) -> Result<String, AggregateError> {
        match std::fs::read_to_string(&config.instructions_file) {
            Ok(contents) => Ok(contents),
            Err(e) if config.dry_run => {
                tracing::debug!(error = %e, "missing instructions file tolerated in dry-run");
                Ok(String::new())
            }
            Err(e) => {
                let err = OrchestratorError::new(ErrorKind::Unknown, format!("failed to read instructions: {e}"));
                self.audit.log(
                    AuditEntry::new("ReadInstructions", AuditStatus::Failure, err.to_string())
                        .with_error(err.message.clone(), err.audit_type()),
                );
                Err(AggregateError::new(vec![err]))
            }
        }
    }

    async fn fan_out(
        &self,
        cancel: &CancellationToken,
        config: &CliConfig,
        prompt: Arc<str>,
        output_dir: &std::path::Path,
    ) -> Result<(), AggregateError> {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<OrchestratorError>(config.model_names.len().max(1));

        let mut handles = Vec::with_capacity(config.model_names.len());
        for model_name in &config.model_names {
            let model_name = model_name.clone();
            let prompt = Arc::clone(&prompt);
            let cancel = cancel.child_token();
            let tx = tx.clone();
            let api_key = config.api_key.clone();
            let api_endpoint = config.api_endpoint.clone();
            let confirm_tokens = config.confirm_tokens;
            let output_dir = output_dir.to_path_buf();

            let processor = ModelProcessor { audit: Arc::clone(&self.audit), confirmation: Arc::clone(&self.confirmation) };
            let rate_limiter = Arc::clone(&self.rate_limiter);

            let handle = tokio::spawn(async move {
                let permit = match rate_limiter.acquire(&model_name, &cancel).await {
                    Ok(permit) => permit,
                    Err(err) => {
                        let _ = tx.send(err).await;
                        return;
                    }
                };
                let result = processor
                    .process(&cancel, &model_name, prompt, &api_key, api_endpoint.as_deref(), confirm_tokens, &output_dir)
                    .await;
                drop(permit);
                if let Err(err) = result {
                    let _ = tx.send(err).await;
                }
            });
            handles.push(handle);
        }
        drop(tx);

        let mut errors = Vec::new();

        // A panic inside one unit is caught here rather than unwinding the
        // process; it surfaces as an Unknown-kind error alongside any others.
        for join_result in futures::future::join_all(handles).await {
            if let Err(join_err) = join_result {
                errors.push(OrchestratorError::new(
                    ErrorKind::Unknown,
                    format!("model task panicked: {join_err}"),
                ));
            }
        }

        while let Some(err) = rx.recv().await {
            errors.push(err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AggregateError::new(errors))
        }
    }
}

fn create_output_dir(path: &std::path::Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

fn to_map(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}
