mod cli;
mod config;
mod graphql;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Library crates log through `log`; the subscriber bridges those records.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let command = match cli.command {
        Commands::Config(cmd) => {
            return cli::config_cmd::run(cmd, &cli.config, cli.data_dir.as_deref());
        }
        command => command,
    };

    let config = config::effective(&cli.config, cli.data_dir.as_deref())?;
    tracing::info!("Data: {}", config.data_dir.display());

    match command {
        Commands::Collect(args) => cli::collect::run(args, &config).await,
        Commands::Probe(args) => cli::probe::run(args, &config).await,
        Commands::Merge(args) => cli::merge::run(args, &config),
        Commands::Dataset(args) => cli::dataset::run(args, &config),
        Commands::Config(_) => Ok(()),
    }
}
