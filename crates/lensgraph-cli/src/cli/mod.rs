pub mod collect;
pub mod config_cmd;
pub mod dataset;
pub mod merge;
pub mod probe;

use crate::graphql::GraphqlSource;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use lensgraph_core::{
    CancelSignal, Fetcher, FileCheckpointStore, LinkTarget, PipelineConfig, SplitStrategy,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "lensgraph")]
#[command(version, about = "Social graph collection and link-prediction datasets")]
pub struct Cli {
    /// Path to lensgraph.toml
    #[arg(
        long,
        global = true,
        env = "LENSGRAPH_CONFIG",
        default_value = "lensgraph.toml"
    )]
    pub config: PathBuf,

    /// Path to data directory (overrides config file)
    #[arg(long, global = true, env = "LENSGRAPH_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one collection and write a snapshot
    Collect(CollectArgs),
    /// Probe engagements below given posts and write a snapshot
    Probe(ProbeArgs),
    /// Merge all snapshots into a graph directory
    Merge(MergeArgs),
    /// Build a link-prediction dataset from a merged graph
    Dataset(DatasetArgs),
    /// Configuration commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Args, Debug)]
pub struct CollectArgs {
    /// Continue listings from stored checkpoints
    #[arg(long)]
    pub resume: bool,

    /// Override collect.max_accounts
    #[arg(long)]
    pub max_accounts: Option<usize>,

    /// Override collect.max_posts
    #[arg(long)]
    pub max_posts: Option<usize>,

    /// Skip engagement probing
    #[arg(long)]
    pub no_probe: bool,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Seed post ids
    #[arg(required = true)]
    pub posts: Vec<String>,

    /// Override probe.max_posts
    #[arg(long)]
    pub max_posts: Option<usize>,

    /// Override probe.max_depth
    #[arg(long)]
    pub max_depth: Option<u32>,
}

#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Output directory (default: <data_dir>/graph)
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Also publish the merged graph into the redb sink
    #[arg(long)]
    pub publish: bool,
}

#[derive(Args, Debug)]
pub struct DatasetArgs {
    /// Graph directory (default: <data_dir>/graph)
    #[arg(long)]
    pub graph: Option<PathBuf>,

    /// Output directory (default: <data_dir>/dataset)
    #[arg(long)]
    pub out: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub target: Option<TargetArg>,

    #[arg(long, value_enum)]
    pub split: Option<SplitArg>,

    #[arg(long)]
    pub negative_ratio: Option<usize>,

    #[arg(long)]
    pub test_ratio: Option<f64>,

    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Check the configuration file for problems
    Validate,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TargetArg {
    Follows,
    Engagements,
}

impl From<TargetArg> for LinkTarget {
    fn from(arg: TargetArg) -> Self {
        match arg {
            TargetArg::Follows => LinkTarget::Follows,
            TargetArg::Engagements => LinkTarget::Engagements,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SplitArg {
    Random,
    Temporal,
}

impl From<SplitArg> for SplitStrategy {
    fn from(arg: SplitArg) -> Self {
        match arg {
            SplitArg::Random => SplitStrategy::Random,
            SplitArg::Temporal => SplitStrategy::Temporal,
        }
    }
}

/// Fetcher against the configured upstream, checkpointing under the data dir.
pub fn upstream_fetcher(config: &PipelineConfig) -> Result<Arc<Fetcher<GraphqlSource>>> {
    let checkpoints = FileCheckpointStore::open(config.checkpoints_dir())
        .context("Failed to open checkpoint directory")?;
    if !GraphqlSource::supports_page_size(config.fetch.page_size) {
        anyhow::bail!(
            "fetch.page_size {} is below the smallest page the upstream serves (10)",
            config.fetch.page_size
        );
    }
    let source = GraphqlSource::from_config(&config.upstream);
    Ok(Arc::new(Fetcher::new(
        Arc::new(source),
        Arc::new(checkpoints),
        config.fetch.clone(),
    )))
}

/// A signal that fires on Ctrl-C. Work stops at the next page boundary.
pub fn cancel_on_ctrl_c() -> CancelSignal {
    let cancel = CancelSignal::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing the current page");
            trigger.cancel();
        }
    });
    cancel
}
