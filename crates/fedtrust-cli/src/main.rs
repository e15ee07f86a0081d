mod cli;
mod commands;
mod output;

use anyhow::Result;
use cli::{Cli, Command};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // stdout is reserved for the summary.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Setup { target, verify } => commands::setup(target, verify).await,
        Command::Plan { target } => commands::plan(target).await,
        Command::Verify { target } => commands::verify(target).await,
    }
}
