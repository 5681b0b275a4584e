//! doctrans CLI: chunked long-document translation with an LLM.
//!
//! Splits a document into chunks, translates them one at a time with the
//! previous chunk as context, and supports pause, resume, and per-chunk retry.

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
