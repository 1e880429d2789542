//! smo-bot: smart-order execution engine entry point.

mod app;
mod config;
mod error;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::app::App;
use crate::config::AppConfig;

#[derive(Debug, Parser)]
#[command(name = "smo-bot", about = "Smart-order execution engine")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    smo_telemetry::init_logging().context("logging init")?;

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    info!(config = %cli.config.display(), "configuration loaded");

    let app = App::build(config).await.context("building app")?;
    app.run().await.context("running app")?;

    Ok(())
}
