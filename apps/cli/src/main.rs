//! assetweave CLI: rewrite HTML build blocks and emit the combined assets.
//!
//! Documents are scanned for asset groups; each group's files are resolved,
//! merged in reference order and written as one output per group.

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
