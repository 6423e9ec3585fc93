use crate::cli::{cancel_on_ctrl_c, upstream_fetcher, ProbeArgs};
use anyhow::{Context, Result};
use chrono::Utc;
use lensgraph_core::{EngagementProber, PipelineConfig, Post, Snapshot, SnapshotStore};

/// Probe below explicit seed posts. Seeds carry no totals, so reconciliation
/// reports them as unverified.
pub async fn run(args: ProbeArgs, config: &PipelineConfig) -> Result<()> {
    let mut probe = config.probe.clone();
    if let Some(max) = args.max_posts {
        probe.max_posts = max;
    }
    if args.max_depth.is_some() {
        probe.max_depth = args.max_depth;
    }
    probe.validate()?;

    let fetcher = upstream_fetcher(config)?;
    let prober = EngagementProber::new(fetcher, probe);
    let seeds: Vec<Post> = args.posts.into_iter().map(Post::stub).collect();

    let cancel = cancel_on_ctrl_c();
    let outcome = prober.probe(&seeds, &cancel).await;

    let mut snapshot = Snapshot::new(Utc::now());
    snapshot.posts = outcome.posts;
    snapshot.engagements = outcome.engagements;
    let store = SnapshotStore::open(config.snapshots_dir())
        .context("Failed to open snapshot directory")?;
    if !snapshot.is_empty() {
        store.write_next(&mut snapshot)?;
    }

    println!();
    println!("Probe {}", snapshot.id);
    println!("{}", "─".repeat(50));
    println!("Probed:       {:>8}", outcome.reconciliation.len());
    println!("Posts:        {:>8}", snapshot.posts.len());
    println!("Engagements:  {:>8}", snapshot.engagements.len());
    println!("Failed:       {:>8}", outcome.failed.len());
    println!("Pending:      {:>8}", outcome.pending.len());
    println!("Stopped:      {:?}", outcome.stop);
    println!("{}", "─".repeat(50));
    println!();
    Ok(())
}
