//! Kotoba CLI - command-line interface over the translation pipeline

pub mod commands;
pub mod progress;

use std::path::PathBuf;

use clap::Parser;
use commands::Commands;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kotoba")]
#[command(about = "Kotoba: dump, translate, rebuild and hot-reload game text", long_about = None)]
#[command(version)]
struct Cli {
    /// Settings file
    #[arg(short, long, global = true, default_value = crate::config::CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Run the Kotoba CLI
pub fn run_cli() -> anyhow::Result<()> {
    // Setup logging; RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    cli.command.execute(&cli.config)?;

    Ok(())
}
