//! Weekly newsletter run: collect, triage, dedupe, analyze, compose, deliver.
//!
//! Each stage is checkpointed; `--resume` continues a failed or stopped run.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use silvertree_newsletter::config::Settings;
use silvertree_newsletter::telemetry::Telemetry;
use silvertree_newsletter::workflow::{
    Collaborators, FileCheckpointStore, Node, RunOptions, WorkflowEngine, LATEST,
};

#[derive(Parser)]
#[command(name = "silvertree-newsletter")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build and send the weekly SilverTree M&A signals newsletter")]
struct Cli {
    /// Continue from the last checkpoint of `--thread-id`
    #[arg(long)]
    resume: bool,

    /// Run id to resume or to use for a fresh run
    #[arg(long, default_value = LATEST)]
    thread_id: String,

    /// Stop after this node's checkpoint is written (e.g. `triage`)
    #[arg(long)]
    stop_after: Option<Node>,

    /// Settings file (TOML or JSON)
    #[arg(long, env = "NEWSLETTER_CONFIG_PATH")]
    config: Option<PathBuf>,
}

/// Compact logs by default, JSON lines when `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("silvertree_newsletter=info,warn"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env for local runs; missing file is fine.
    let _ = dotenvy::dotenv();
    init_tracing();
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load_default()?,
    };
    let telemetry = match Telemetry::init() {
        Ok(t) => Some(t),
        Err(e) => {
            tracing::warn!(target: "main", error = %e, "metrics recorder not installed");
            None
        }
    };

    let output_dir = settings.paths.output_dir.clone();
    let store = Arc::new(FileCheckpointStore::new(settings.paths.checkpoint_dir.clone()));
    let deps = Collaborators::from_settings(settings).context("wiring collaborators")?;
    let engine = WorkflowEngine::new(Arc::new(deps), store);

    let opts = RunOptions {
        thread_id: cli.thread_id,
        resume: cli.resume,
        stop_after: cli.stop_after,
    };
    let result = engine.run(opts).await;

    if let Some(t) = &telemetry {
        match t.write_snapshot(&output_dir) {
            Ok(path) => tracing::debug!(target: "main", path = %path.display(), "metrics snapshot written"),
            Err(e) => tracing::warn!(target: "main", error = %e, "metrics snapshot failed"),
        }
    }

    let report = result?;
    tracing::info!(
        target: "main",
        run_id = %report.run_id,
        finished = report.is_finished(),
        output = ?report.state.output_path,
        errors = report.state.errors.len(),
        "done"
    );
    for e in &report.state.errors {
        tracing::warn!(target: "main", error = %e, "run error");
    }
    Ok(())
}
