use crate::cli::MergeArgs;
use anyhow::{Context, Result};
use lensgraph_core::{merge, publish, write_graph, PipelineConfig, RedbSink, SnapshotStore};

pub fn run(args: MergeArgs, config: &PipelineConfig) -> Result<()> {
    let store = SnapshotStore::open(config.snapshots_dir())
        .context("Failed to open snapshot directory")?;
    let loaded = store.load_all()?;
    if loaded.snapshots.is_empty() {
        anyhow::bail!("No snapshots in {}", store.dir().display());
    }
    if loaded.rejected > 0 {
        tracing::warn!("Skipped {} invalid stored records", loaded.rejected);
    }

    let graph = merge(&loaded.snapshots);
    let out = args.out.unwrap_or_else(|| config.graph_dir());
    write_graph(&graph, &out).with_context(|| format!("Failed to write {}", out.display()))?;

    let s = &graph.summary;
    println!();
    println!("Merged {} snapshots into {}", s.sources.len(), out.display());
    println!("{}", "─".repeat(50));
    println!("Accounts:     {:>8}  ({} stubs)", s.counts.accounts, s.stub_accounts);
    println!("Posts:        {:>8}  ({} stubs)", s.counts.posts, s.stub_posts);
    println!("Follows:      {:>8}", s.counts.follows);
    println!("Engagements:  {:>8}", s.counts.engagements);
    println!("Conflicts:    {:>8}", s.conflicts.len());

    if args.publish {
        let sink = RedbSink::open(config.sink_path())?;
        let report = publish(&graph, &sink);
        println!(
            "Published:    {:>8}  ({} failed) to {}",
            report.written,
            report.failed,
            sink.path().display()
        );
    }
    println!("{}", "─".repeat(50));
    println!();
    Ok(())
}
