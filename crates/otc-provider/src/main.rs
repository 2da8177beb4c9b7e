//! otc-provider binary: serves the plugin protocol over stdio.

mod app;

use anyhow::Result;
use clap::Parser;

/// main entrypoint for the async cli.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = app::Cli::parse();
    app::init_logging(cli.log_file.as_deref())?;
    app::run(cli).await
}
