//! rostermill CLI — LLM-driven company roster enrichment.
//!
//! Runs classification stages over CSV rosters with bounded concurrency,
//! retries, and resumable incremental saves.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
