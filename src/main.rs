use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use genorc::audit::{AuditSink, FileAuditSink, NoopAuditSink};
use genorc::cli::Cli;
use genorc::config::CliConfig;
use genorc::orchestrator::Orchestrator;
use genorc::processor::StdinConfirmationPrompt;
use genorc::rate_limiter::RateLimiter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = CliConfig::from_args(cli);

    init_logging(&config);

    if let Err(e) = config.validate() {
        eprintln!("invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    match run(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Builds the audit sink and orchestrator and drives a single run.
///
/// Everything below this boundary uses `anyhow::Result` so filesystem and
/// configuration failures pick up the `.context(...)` call site instead of
/// a bare `io::Error`; only the orchestrator's own run result keeps its
/// typed `AggregateError`.
async fn run(config: &CliConfig) -> anyhow::Result<()> {
    let audit: Arc<dyn AuditSink> = match &config.audit_log_file {
        Some(path) => {
            let sink = FileAuditSink::open(path)
                .with_context(|| format!("failed to open audit log {}", path.display()))?;
            Arc::new(sink)
        }
        None => Arc::new(NoopAuditSink),
    };

    let rate_limiter = Arc::new(RateLimiter::new(config.max_concurrent_requests, config.rate_limit_requests_per_minute));
    let orchestrator = Orchestrator::new(audit, rate_limiter, Arc::new(StdinConfirmationPrompt));

    let cancel = CancellationToken::new();
    orchestrator.run(cancel, config).await.context("run failed")
}

fn init_logging(config: &CliConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
