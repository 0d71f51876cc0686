mod config;
mod cookies;
mod error;
mod evidence;
mod executor;
mod http;
mod login;
mod navigate;
mod orchestrator;
mod progress;
mod session;
mod types;

use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use tokio::sync::{broadcast, mpsc};
use tracing::info;

use crate::config::Config;
use crate::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,uireplay=debug".into()),
        )
        .with_target(false)
        .init();

    let config = Config::parse();
    info!(
        "starting uireplay ({} mode)",
        if config.interactive { "interactive" } else { "headless" }
    );

    // capacity 1: requests queue at the HTTP layer while one run is active
    let (cmd_tx, cmd_rx) = mpsc::channel(1);
    let (event_tx, _) = broadcast::channel(64);

    http::start_server(&config, cmd_tx, event_tx.clone()).await?;

    // the orchestrator loop owns the browser for the process lifetime and
    // closes it on shutdown
    Orchestrator::new(config, event_tx)?.run(cmd_rx).await;

    info!("uireplay stopped");
    Ok(())
}
