use crate::cli::{cancel_on_ctrl_c, upstream_fetcher, CollectArgs};
use anyhow::{Context, Result};
use lensgraph_core::{CollectionReport, Collector, PipelineConfig, SnapshotStore};

pub async fn run(args: CollectArgs, config: &PipelineConfig) -> Result<()> {
    let mut config = config.clone();
    if let Some(max) = args.max_accounts {
        config.collect.max_accounts = max;
    }
    if let Some(max) = args.max_posts {
        config.collect.max_posts = max;
    }
    if args.no_probe {
        config.collect.probe_seed_posts = 0;
    }
    config.validate()?;

    let fetcher = upstream_fetcher(&config)?;
    let store = SnapshotStore::open(config.snapshots_dir())
        .context("Failed to open snapshot directory")?;
    let collector = Collector::new(fetcher, store, config.collect.clone(), config.probe.clone())
        .with_resume(args.resume);

    let cancel = cancel_on_ctrl_c();
    let report = collector.run(&cancel).await;
    print_report(&report);

    if let Some(error) = &report.write_error {
        anyhow::bail!("Snapshot not written: {}", error);
    }
    if let Some(reason) = &report.aborted {
        anyhow::bail!("Collection aborted: {}", reason);
    }
    Ok(())
}

fn print_report(report: &CollectionReport) {
    println!();
    println!("Collection {}", report.snapshot_id.as_deref().unwrap_or("(nothing written)"));
    println!("{}", "─".repeat(50));
    println!("Accounts:     {:>8}", report.counts.accounts);
    println!("Posts:        {:>8}", report.counts.posts);
    println!("Follows:      {:>8}", report.counts.follows);
    println!("Engagements:  {:>8}", report.counts.engagements);
    println!("Rejected:     {:>8}", report.rejected);
    for (listing, exhausted) in &report.exhausted {
        println!(
            "  {:12} {}",
            listing,
            if *exhausted { "exhausted" } else { "partial" }
        );
    }

    let r = &report.reconciliation;
    if r.total() > 0 {
        println!(
            "Reconciled:   {} complete, {} incomplete, {} overcomplete, {} unverified, {} failed",
            r.complete, r.incomplete, r.overcomplete, r.unverified, r.failed
        );
    }
    if report.probe_pending > 0 {
        println!("Probe pending: {}", report.probe_pending);
    }
    if !report.failed_accounts.is_empty() {
        println!("Failed accounts: {}", report.failed_accounts.join(", "));
    }
    for error in &report.listing_errors {
        println!("Listing error: {}", error);
    }
    if report.cancelled {
        println!("Cancelled before completion");
    }
    println!("{}", "─".repeat(50));
    println!();
}
