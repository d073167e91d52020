//! Command line arguments and logging setup.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use corelib::RingConfig;
use tracing_subscriber::EnvFilter;

use crate::commands::Command;

/// Inspect and exercise a consistent-hash backend ring.
#[derive(Debug, Parser)]
#[command(name = "ringctl", version)]
pub struct CliConfig {
    /// Ring configuration file (JSON).
    #[arg(short, long)]
    pub config: PathBuf,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

impl CliConfig {
    pub async fn run(self) -> anyhow::Result<()> {
        init_tracing(&self.log_level);

        let ring = RingConfig::from_path(&self.config)
            .with_context(|| format!("loading {}", self.config.display()))?;

        let mut stdout = std::io::stdout().lock();
        self.command.execute(&ring, &mut stdout).await
    }
}

/// Logs go to stderr so command output stays pipeable.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
