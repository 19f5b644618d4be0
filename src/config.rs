//! Validated run configuration (§3 CliConfig, §8 ambient configuration).

use std::path::PathBuf;

use thiserror::Error;

use crate::cli::Cli;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<&str> for LogLevel {
    /// Invalid values fall back to `info` (§6 CLI surface).
    fn from(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "debug" => LogLevel::Debug,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub instructions_file: PathBuf,
    pub paths: Vec<String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub exclude_names: Vec<String>,
    pub format: String,
    pub output_dir: PathBuf,
    pub model_names: Vec<String>,
    pub api_key: String,
    pub api_endpoint: Option<String>,
    pub dry_run: bool,
    pub confirm_tokens: u32,
    pub max_concurrent_requests: usize,
    pub rate_limit_requests_per_minute: u32,
    pub audit_log_file: Option<PathBuf>,
    pub log_level: LogLevel,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("--instructions is required unless --dry-run is set")]
    MissingInstructions,
    #[error("at least one path must be provided")]
    NoPaths,
    #[error("at least one --model is required unless --dry-run is set")]
    NoModels,
    #[error("GENORC_API_KEY is required unless --dry-run is set")]
    MissingApiKey,
}

impl CliConfig {
    pub fn from_args(cli: Cli) -> Self {
        let log_level = if cli.verbose {
            LogLevel::Debug
        } else {
            LogLevel::from(cli.log_level.as_str())
        };

        Self {
            instructions_file: cli.instructions.unwrap_or_default(),
            paths: cli.paths,
            include: cli.include,
            exclude: cli.exclude,
            exclude_names: cli.exclude_names,
            format: cli.format.unwrap_or_default(),
            output_dir: cli.output_dir.unwrap_or_default(),
            model_names: cli.model,
            api_key: cli.api_key.unwrap_or_default(),
            api_endpoint: cli.api_endpoint,
            dry_run: cli.dry_run,
            confirm_tokens: cli.confirm_tokens,
            max_concurrent_requests: cli.max_concurrent,
            rate_limit_requests_per_minute: cli.rate_limit,
            audit_log_file: cli.audit_log_file,
            log_level,
        }
    }

    /// Validated once, before orchestration begins (§3 invariant).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.dry_run {
            if self.instructions_file.as_os_str().is_empty() {
                return Err(ConfigError::MissingInstructions);
            }
            if self.model_names.is_empty() {
                return Err(ConfigError::NoModels);
            }
            if self.api_key.is_empty() {
                return Err(ConfigError::MissingApiKey);
            }
        }
        if self.paths.is_empty() {
            return Err(ConfigError::NoPaths);
        }
        Ok(())
    }
}
