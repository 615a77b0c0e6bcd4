//! Geoenrich CLI: batched, cache-accelerated geocoding of NDJSON records.
//!
//! Reads records, resolves their address field through a persistent cache
//! and the Geocodio batch API, and writes the enriched records back out.

mod commands;
mod io;
mod progress;

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
