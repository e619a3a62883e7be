//! fleetd: the bot fleet controller daemon.
//!
//! # Usage
//!
//! ```text
//! fleetd --config /etc/fleet/fleet.toml serve
//! fleetd --config /etc/fleet/fleet.toml pass
//! fleetd --config /etc/fleet/fleet.toml prune --older-than 14d
//! fleetd --config /etc/fleet/fleet.toml reconcile
//! ```
//!
//! The store is a single redb file and only one process may open it. While
//! `serve` is running, trigger passes through `POST /api/v1/pass` rather
//! than `fleetd pass`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use fleet_core::parse_duration;
use fleetd::{Fleet, app, load_config, telemetry};

#[derive(Parser)]
#[command(name = "fleetd", about = "Bot fleet auto-scaling controller")]
struct Cli {
    /// Path to fleet.toml. Defaults apply when omitted.
    #[arg(long, short, env = "FLEET_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API (pass trigger, admin, status).
    Serve {
        /// Overrides `server.bind`.
        #[arg(long)]
        bind: Option<String>,
    },
    /// Run one monitoring pass and print the summary as JSON.
    Pass,
    /// Delete resource samples older than the retention window.
    Prune {
        /// Overrides `samples.retention` (e.g. "7d").
        #[arg(long)]
        older_than: Option<String>,
    },
    /// Compare the store with the hosting platform and print a report.
    Reconcile,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    telemetry::init(config.logging.format);

    let fleet = Fleet::open(config)?;

    match cli.command {
        Command::Serve { bind } => serve(fleet, bind).await,
        Command::Pass => {
            let summary = fleet.driver.run_pass().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Command::Prune { older_than } => {
            let retention = older_than.as_deref().map(parse_duration).transpose()?;
            let removed = fleet.prune(retention)?;
            println!("{removed}");
            Ok(())
        }
        Command::Reconcile => {
            let report = fleet.reconcile().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

async fn serve(fleet: Fleet, bind: Option<String>) -> anyhow::Result<()> {
    let addr = bind.unwrap_or_else(|| fleet.config.server.bind.clone());
    if fleet.config.auth.trigger_token.is_empty() || fleet.config.auth.admin_token.is_empty() {
        warn!("an auth token is empty; its routes will reject every request");
    }

    let fleet = std::sync::Arc::new(fleet);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pruner = fleet.clone();
    let prune_handle = tokio::spawn(async move {
        pruner.run_pruner(app::PRUNE_INTERVAL, shutdown_rx).await;
    });

    let router = fleet.router();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "API server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = prune_handle.await;
    info!("fleetd stopped");
    Ok(())
}
