//! loadpilotd — the loadpilot daemon.
//!
//! Single binary that assembles every loadpilot subsystem:
//! - Capacity registry and metrics store
//! - Load balancer, algorithm optimizer, request processor
//! - Health monitor and alerting
//! - Autoscaler (rule engine, decision engine, executor)
//! - State persistence (redb)
//! - REST API
//!
//! # Usage
//!
//! ```text
//! loadpilotd run --config loadpilot.toml --listen 0.0.0.0:8080
//! loadpilotd validate --config loadpilot.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use loadpilot_autoscale::RuleEngine;
use loadpilot_controller::Controller;
use loadpilot_core::LoadPilotConfig;
use loadpilot_state::ComponentScalingPolicy;

const DEFAULT_FILTER: &str = "info,loadpilotd=debug,loadpilot_controller=debug";

#[derive(Parser)]
#[command(name = "loadpilotd", about = "loadpilot adaptive load balancing and autoscaling daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the controller and the REST API.
    Run {
        /// Path to loadpilot.toml.
        #[arg(long, short, default_value = "loadpilot.toml")]
        config: PathBuf,

        /// Address the API listens on.
        #[arg(long, default_value = "0.0.0.0:8080")]
        listen: SocketAddr,
    },
    /// Check a configuration file without starting any loop.
    Validate {
        #[arg(long, short, default_value = "loadpilot.toml")]
        config: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));
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

    match cli.command {
        Command::Run { config, listen } => run(&config, listen).await,
        Command::Validate { config } => validate(&config),
    }
}

fn load_config(path: &Path) -> anyhow::Result<LoadPilotConfig> {
    LoadPilotConfig::from_file(path)
        .with_context(|| format!("loading {}", path.display()))
}

fn validate(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path)?;
    config.validate()?;

    let mut rules = RuleEngine::new();
    let mut disabled = 0;
    for component in &config.components {
        for e in rules.load_policy(&ComponentScalingPolicy::from_config(component)) {
            warn!(component = %component.id, error = %e, "rule will be disabled");
            disabled += 1;
        }
    }

    info!(
        path = %path.display(),
        components = config.components.len(),
        disabled_rules = disabled,
        "configuration valid"
    );
    Ok(())
}

async fn run(path: &Path, listen: SocketAddr) -> anyhow::Result<()> {
    info!("loadpilot daemon starting");

    let config = load_config(path)?;
    if let Some(ref state_path) = config.persistence.path {
        if let Some(dir) = state_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
    }

    // ── Initialize subsystems ──────────────────────────────────

    let controller = Arc::new(Controller::init(config).await?);
    controller.start().await?;

    // ── Start API server ───────────────────────────────────────

    let router = loadpilot_api::build_router(Arc::clone(&controller));
    info!(addr = %listen, "API server starting");
    let listener = tokio::net::TcpListener::bind(listen).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
    });

    let served = server.await;

    // Stop the loops and persist final state even if the server failed.
    controller.shutdown().await;
    served?;

    info!("loadpilot daemon stopped");
    Ok(())
}
