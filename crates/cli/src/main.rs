mod cli;
mod commands;
mod config;

use anyhow::Result;
use clap::Parser;

use crate::cli::{CliArgs, Command};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    connect_core::config::load_dotenv();
    let config = connect_core::Config::from_env();
    config.validate()?;

    match args.command {
        Command::Convert(a) => commands::run_convert(&config, a).await,
        Command::Validate(a) => commands::run_validate(a),
        Command::Ingest(a) => commands::run_ingest(&config, a).await,
    }
}
