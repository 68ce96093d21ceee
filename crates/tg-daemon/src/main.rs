//! taskgate daemon: runs the agent task orchestrator on a fixed tick.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tg_core::config::{AgentSeed, Config, LogFormat};
use tg_core::types::{AgentMode, TaskKind};
use tg_daemon::daemon::Daemon;
use tg_daemon::orchestrator::Orchestrator;
use tracing::{error, info, warn};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Agent task orchestrator with human approval gates.
#[derive(Parser)]
#[command(name = "taskgate", version, about)]
struct Cli {
    /// Config file (default: ~/.taskgate/config.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit JSON log lines instead of human-readable output.
    #[arg(long)]
    json_logs: bool,

    /// Run this many ticks, print a KPI summary and exit.
    #[arg(long)]
    ticks: Option<u64>,

    /// Register one agent per task kind when the config declares none.
    #[arg(long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, load_error) = load_config(cli.config.as_ref())?;

    let json = cli.json_logs || config.general.log_format == LogFormat::Json;
    tg_telemetry::logging::init("taskgate", &config.general.log_level, json);
    if let Some(e) = load_error {
        warn!(error = %e, "failed to load config, using defaults");
    }

    if cli.demo && config.agents.is_empty() {
        config.agents = demo_agents();
    }

    let orchestrator =
        Arc::new(Orchestrator::from_config(config).context("failed to build orchestrator")?);
    info!(agents = orchestrator.list_agents().len(), "taskgate starting");

    let mut daemon = Daemon::new(orchestrator.clone());
    if let Some(ticks) = cli.ticks {
        daemon = daemon.with_max_ticks(ticks);
    }

    let shutdown = daemon.shutdown_handle();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        shutdown.trigger();
    });

    let stats = daemon.run().await;

    let summary = serde_json::json!({
        "daemon": stats,
        "kpi": orchestrator.kpi(),
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("failed to render summary")?
    );
    Ok(())
}

/// An explicit `--config` path must load. The default path falls back to
/// defaults; the error is returned so it can be logged once logging is up.
fn load_config(path: Option<&PathBuf>) -> Result<(Config, Option<tg_core::config::ConfigError>)> {
    match path {
        Some(path) => {
            let config = Config::load_from(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?;
            Ok((config, None))
        }
        None if !Config::default_path().exists() => Ok((Config::default(), None)),
        None => match Config::load() {
            Ok(config) => Ok((config, None)),
            Err(e) => Ok((Config::default(), Some(e))),
        },
    }
}

fn demo_agents() -> Vec<AgentSeed> {
    let names = [
        (TaskKind::MaintenanceScheduling, "Maintenance Scheduler"),
        (TaskKind::PartsOrdering, "Parts Buyer"),
        (TaskKind::ClaimProcessing, "Warranty Claims"),
        (TaskKind::CustomerCommunication, "Customer Outreach"),
        (TaskKind::InventoryManagement, "Inventory Balancer"),
    ];
    names
        .into_iter()
        .enumerate()
        .map(|(i, (kind, name))| AgentSeed {
            id: format!("a{}", i + 1),
            name: name.to_string(),
            kind,
            mode: AgentMode::Active,
        })
        .collect()
}
