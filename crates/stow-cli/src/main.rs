//! Stow CLI - a layered key-value store with plain and encrypted engines
//!
//! A thin command-line host for the core engines over file-backed stores.
//! Logging goes to stderr and is controlled with `STOW_LOG`.

mod app;
mod cli;
mod commands;
mod config;
mod ui;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use app::{Session, Settings};
use cli::Cli;

const LOG_ENV: &str = "STOW_LOG";

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let settings = Settings::resolve(&cli)?;
    let session = Session::open(settings)?;
    commands::run(&cli.command, &session, cli.quiet).await
}
