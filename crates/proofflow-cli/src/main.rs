//! CLI entry point for proofflow.
//!
//! This binary provides the `proofflow` command: the HTTP API (`serve`) plus
//! one-shot subcommands for running, classifying and inspecting workflows.

mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use proofflow_agent::{CompletionProvider, LlmClient, LlmClientConfig};
use proofflow_intent::{
    CompileReport, IntentError, Ledger, Pipeline, PipelineConfig, TransferStatusPoller,
};
use proofflow_store::{Database, HistoryStore};
use proofflow_web::{AppState, WebConfig, WebServer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

const DEFAULT_MODEL_ANTHROPIC: &str = "claude-3-5-haiku-latest";

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is normal.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(if cli.verbose { "debug" } else { "info" }, cli.log_json);

    let mut config = PipelineConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    config
        .apply_overrides(|key| std::env::var(key).ok())
        .context("invalid environment override")?;
    let provider = resolve_provider(&mut config)?;
    let db_path = env_non_empty("PROOFFLOW_DB").map_or(cli.db, PathBuf::from);

    match cli.command {
        Commands::Serve { bind, port } => cmd_serve(config, provider, db_path, bind, port).await,
        Commands::Run { command, dry_run } => {
            cmd_run(config, provider, db_path, &command, dry_run).await
        }
        Commands::Classify { command } => cmd_classify(&config, &command),
        Commands::Poll {
            transfer_id,
            ledger,
        } => cmd_poll(&config, &transfer_id, &ledger).await,
        Commands::History { limit } => cmd_history(db_path, limit).await,
    }
}

// ---------------------------------------------------------------------------
// Subcommand: serve
// ---------------------------------------------------------------------------

async fn cmd_serve(
    config: PipelineConfig,
    provider: Option<Arc<dyn CompletionProvider>>,
    db_path: PathBuf,
    bind: String,
    port: u16,
) -> Result<()> {
    let db = Database::open_and_migrate(db_path)
        .await
        .context("failed to open history database")?;

    let state = Arc::new(AppState {
        pipeline: Arc::new(Pipeline::new(&config, provider).context("failed to build pipeline")?),
        poller: Arc::new(TransferStatusPoller::from_config(&config)),
        history: Some(HistoryStore::new(db)),
    });

    let server = WebServer::new(
        WebConfig {
            bind_addr: bind,
            port,
        },
        state,
    );
    println!("  proofflow listening on http://{}", server.addr());
    server.start().await.context("web server failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: run
// ---------------------------------------------------------------------------

async fn cmd_run(
    config: PipelineConfig,
    provider: Option<Arc<dyn CompletionProvider>>,
    db_path: PathBuf,
    command: &str,
    dry_run: bool,
) -> Result<()> {
    let pipeline = Pipeline::new(&config, provider).context("failed to build pipeline")?;

    if dry_run {
        let report = match pipeline.compile(command).await {
            Ok(compiled) => CompileReport::from_result(command, &Ok(compiled.graph)),
            Err(IntentError::Compile(e)) => CompileReport::from_result(command, &Err(e)),
            Err(e) => return Err(e).context("workflow rejected"),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let run = pipeline.run(command).await;

    match Database::open_and_migrate(db_path).await {
        Ok(db) => {
            let entry = proofflow_web::api::history_entry(&run);
            if let Err(e) = HistoryStore::new(db).record(entry).await {
                warn!(error = %e, "failed to record workflow history");
            }
        }
        Err(e) => warn!(error = %e, "history database unavailable"),
    }

    println!("{}", serde_json::to_string_pretty(&run.report())?);
    if !run.succeeded() {
        std::process::exit(1);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommands: classify, poll, history
// ---------------------------------------------------------------------------

fn cmd_classify(config: &PipelineConfig, command: &str) -> Result<()> {
    let pipeline = Pipeline::new(config, None).context("failed to build pipeline")?;
    let classification = pipeline.classify(command);
    println!("{}", serde_json::to_string_pretty(&classification)?);
    Ok(())
}

async fn cmd_poll(config: &PipelineConfig, transfer_id: &str, ledger: &str) -> Result<()> {
    let ledger: Ledger = ledger.parse()?;
    let poller = TransferStatusPoller::from_config(config);
    let report = poller
        .poll(transfer_id, ledger)
        .await
        .context("status lookup failed")?;
    if !report.lookup_succeeded() {
        anyhow::bail!("status lookup exited with {}: {}", report.exit_code, report.stderr.trim());
    }
    println!("{}", serde_json::to_string_pretty(&report.status)?);
    Ok(())
}

async fn cmd_history(db_path: PathBuf, limit: usize) -> Result<()> {
    let db = Database::open_and_migrate(db_path)
        .await
        .context("failed to open history database")?;
    let entries = HistoryStore::new(db).recent(limit).await?;

    if entries.is_empty() {
        println!("  No workflows recorded yet.");
        return Ok(());
    }
    for entry in entries {
        println!(
            "  {}  {:<9}  {:>2} steps  {}  {}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.status.as_str(),
            entry.step_count,
            entry.id,
            entry.description,
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build a completion client from whichever API key is present.
///
/// `OPENAI_API_KEY` wins over `ANTHROPIC_API_KEY`; `PROOFFLOW_LLM_BASE_URL`
/// points either at a compatible endpoint.  With no key, workflows still
/// run through the rule-based compiler.
fn resolve_provider(config: &mut PipelineConfig) -> Result<Option<Arc<dyn CompletionProvider>>> {
    let base_url = env_non_empty("PROOFFLOW_LLM_BASE_URL");

    let llm_config = if let Some(key) = env_non_empty("OPENAI_API_KEY") {
        let mut cfg = LlmClientConfig::openai(key, config.model.clone());
        if let Some(url) = base_url {
            cfg.base_url = url;
        }
        cfg
    } else if let Some(key) = env_non_empty("ANTHROPIC_API_KEY") {
        if env_non_empty("PROOFFLOW_MODEL").is_none()
            && config.model == PipelineConfig::default().model
        {
            config.model = DEFAULT_MODEL_ANTHROPIC.to_owned();
        }
        let mut cfg = LlmClientConfig::anthropic(key, config.model.clone());
        if let Some(url) = base_url {
            cfg.base_url = url;
        }
        cfg
    } else {
        warn!("no completion provider configured; complex commands will fail to compile");
        return Ok(None);
    };

    let client = LlmClient::new(llm_config).context("failed to build completion client")?;
    info!(provider = ?client.provider(), model = %config.model, "completion provider ready");
    Ok(Some(Arc::new(client)))
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Initialize the tracing subscriber with the given default log level.
fn init_tracing(default_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}
