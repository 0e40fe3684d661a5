//! taraflow CLI entry point.
//!
//! This binary is the composition root for the entire system:
//!
//! 1. **Parse arguments and configuration** — clap arguments, TOML config
//!    with `TARAFLOW_*` environment overrides.
//! 2. **Wire observability** — `tracing-subscriber` with an env-filter
//!    layer, optionally emitting JSON events.
//! 3. **Construct infrastructure** — the OpenAI-compatible backend, the
//!    token-bucket rate limiter, and the resilient client, injected into
//!    the orchestrator as the `LlmProvider` port.
//! 4. **Run and export** — ingest the asset inventory, run the pipeline,
//!    write the analysis rows and requirement digests as CSV.
//!
//! A run that merely has failed branches still exits 0 and reports counts;
//! only pre-pipeline failures (unreadable inventory, bad configuration)
//! exit non-zero.

mod config;
mod export;
mod ingest;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use llm::{OpenAiChatBackend, RateLimiter, ResilientClient, TokioPacer};
use nodes::AnalysisOrchestrator;

use crate::config::TaraflowConfig;

#[derive(Parser, Debug)]
#[command(
    name = "taraflow",
    version,
    about = "Concurrent LLM-driven threat analysis and risk assessment pipeline"
)]
struct Cli {
    /// Asset inventory: a JSON array of assets.
    #[arg(long)]
    assets: PathBuf,

    /// Output file for the analysis rows (semicolon-delimited CSV).
    #[arg(long, default_value = "tara_report.csv")]
    out: PathBuf,

    /// Output file for the requirement digests (semicolon-delimited CSV).
    #[arg(long, default_value = "tara_requirements.csv")]
    requirements_out: PathBuf,

    /// Configuration file (TOML). Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit log events as JSON.
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = TaraflowConfig::load(cli.config.as_deref())?;
    let assets = ingest::read_assets(&cli.assets)?;
    info!(assets = assets.len(), "asset inventory loaded");

    let api_key = config.resolve_api_key()?;
    let pacer = Arc::new(TokioPacer);
    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit.tokens_per_minute,
        config.rate_limit.burst_capacity,
        pacer.clone(),
    ));
    let backend = Arc::new(OpenAiChatBackend::new(config.endpoint_config(api_key)));
    let client = ResilientClient::with_pacer(backend, limiter, config.retry_settings(), pacer);
    let orchestrator =
        AnalysisOrchestrator::new(Arc::new(client), config.orchestrator_options());

    let report = orchestrator.run(assets).await;

    export::write_rows(&cli.out, &report.rows)
        .with_context(|| format!("writing {}", cli.out.display()))?;
    export::write_digests(&cli.requirements_out, &report.digests)
        .with_context(|| format!("writing {}", cli.requirements_out.display()))?;

    info!(
        run_id = %report.run_id,
        roots = report.totals.roots,
        roots_aborted = report.totals.roots_aborted,
        completed = report.totals.branches_completed,
        failed = report.totals.branches_failed,
        terminated = report.totals.branches_terminated,
        rows = report.rows.len(),
        digests = report.digests.len(),
        report = %cli.out.display(),
        requirements = %cli.requirements_out.display(),
        "analysis run finished"
    );
    Ok(())
}
