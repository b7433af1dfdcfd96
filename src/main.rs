//! Main entry point for the repo-miner CLI

use anyhow::Context;
use clap::Parser;
use repo_miner::cli::{Cli, Commands};
use repo_miner::shutdown::{self, ShutdownCoordinator};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initialize tracing on stderr, JSON when `LOG_FORMAT=json`
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("repo_miner=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(addr) = cli.metrics_addr {
        repo_miner::metrics::init_metrics(addr)
            .with_context(|| format!("serving metrics on {addr}"))?;
    }

    let shutdown = ShutdownCoordinator::shared();
    shutdown::set_global_shutdown(shutdown.clone());
    let _ctrl_c = shutdown.listen_for_ctrl_c();

    match &cli.command {
        Commands::Collect(args) => args.execute(&cli, shutdown).await?,
        Commands::Verify(args) => args.execute(&cli).await?,
        Commands::Status(args) => args.execute(&cli).await?,
        Commands::Checkpoint(command) => command.execute(&cli).await?,
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("Command failed: {:#}", e);
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
