//! Process argument parsing (§6 CLI surface).

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "genorc", about = "Fan a stitched prompt out to multiple LLM backends concurrently")]
pub struct Cli {
    /// Path to the instructions file (required unless --dry-run).
    #[arg(long)]
    pub instructions: Option<PathBuf>,

    /// Directory or file paths to gather context from.
    #[arg(value_name = "PATH")]
    pub paths: Vec<String>,

    /// Directory generation output is written to; generated if omitted.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Model name to dispatch to; may be repeated.
    #[arg(long = "model")]
    pub model: Vec<String>,

    /// Glob pattern a file's relative path must match to be included.
    #[arg(long)]
    pub include: Vec<String>,

    /// Glob pattern a file's relative path must not match.
    #[arg(long)]
    pub exclude: Vec<String>,

    /// Glob pattern a file's bare name must not match.
    #[arg(long = "exclude-names")]
    pub exclude_names: Vec<String>,

    /// Per-file template with {path} and {content} placeholders.
    #[arg(long)]
    pub format: Option<String>,

    /// One of debug/info/warn/error; invalid values fall back to info.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Forces log-level=debug, overriding --log-level.
    #[arg(long)]
    pub verbose: bool,

    /// Gather and report statistics without calling any model.
    #[arg(long)]
    pub dry_run: bool,

    /// Token-count threshold above which an interactive confirmation is
    /// required; 0 disables the prompt.
    #[arg(long, default_value_t = 0)]
    pub confirm_tokens: u32,

    /// Global concurrency cap across all models; 0 means unlimited.
    #[arg(long, default_value_t = 0)]
    pub max_concurrent: usize,

    /// Per-model requests-per-minute cap; 0 means unlimited.
    #[arg(long, default_value_t = 0)]
    pub rate_limit: u32,

    /// JSON-lines audit trail destination; omit to disable auditing.
    #[arg(long)]
    pub audit_log_file: Option<PathBuf>,

    #[arg(long, env = "GENORC_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, env = "GENORC_API_ENDPOINT")]
    pub api_endpoint: Option<String>,
}
