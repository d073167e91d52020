//! CLI entry point for ringctl.

use clap::Parser;
use ringctl::CliConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CliConfig::parse();
    config.run().await
}
