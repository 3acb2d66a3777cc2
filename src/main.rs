#![allow(missing_docs)]

//! chatrelay binary — CLI entry point.
//!
//! `chatrelay start` runs the relay pipeline until interrupted;
//! `chatrelay test-webhook` sends a one-shot probe so the operator can
//! verify the destination before going live.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use url::Url;

use chatrelay::config::{ConfigSource, RelayConfig};
use chatrelay::status::TracingSink;
use chatrelay::{dispatcher, logging, pipeline};

/// Relay game server chat to a Discord webhook.
#[derive(Debug, Parser)]
#[command(name = "chatrelay", version, about)]
struct Cli {
    /// Path to the config file (default: ./config.toml or
    /// $CHATRELAY_CONFIG_PATH).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Tail the log and relay chat messages until interrupted.
    Start,
    /// Send a test message to the configured webhook and exit.
    TestWebhook,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, source) = RelayConfig::load(cli.config).context("failed to load configuration")?;
    config.validate()?;

    match cli.command {
        Command::Start => start(config, source).await,
        Command::TestWebhook => test_webhook(&config).await,
    }
}

async fn start(config: RelayConfig, source: ConfigSource) -> Result<()> {
    let logs_dir = config.logs_dir()?;
    let _guard = logging::init_production(&logs_dir, &config.log.level)?;

    info!(version = env!("CARGO_PKG_VERSION"), "chatrelay starting");
    match source {
        ConfigSource::File(path) => info!(path = %path.display(), "configuration loaded from file"),
        ConfigSource::Defaults => info!("no config file found, using defaults"),
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received shutdown signal");
            signal_cancel.cancel();
        }
    });

    pipeline::run(&config, Arc::new(TracingSink), cancel).await?;

    info!("chatrelay shut down cleanly");
    Ok(())
}

async fn test_webhook(config: &RelayConfig) -> Result<()> {
    logging::init_cli();

    let url = Url::parse(&config.webhook.url).context("invalid webhook URL")?;
    let timeout = Duration::from_secs(config.webhook.request_timeout_secs);

    dispatcher::send_probe(&url, timeout, "🔔 chatrelay webhook test 🧟").await?;
    println!("webhook probe delivered");
    Ok(())
}
