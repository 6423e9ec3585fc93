use crate::cli::DatasetArgs;
use anyhow::{Context, Result};
use lensgraph_core::{build_link_dataset, load_graph, write_dataset, PipelineConfig};

pub fn run(args: DatasetArgs, config: &PipelineConfig) -> Result<()> {
    let mut dataset_config = config.dataset.clone();
    if let Some(target) = args.target {
        dataset_config.target = target.into();
    }
    if let Some(split) = args.split {
        dataset_config.split = split.into();
    }
    if let Some(ratio) = args.negative_ratio {
        dataset_config.negative_ratio = ratio;
    }
    if let Some(ratio) = args.test_ratio {
        dataset_config.test_ratio = ratio;
    }
    if let Some(seed) = args.seed {
        dataset_config.seed = seed;
    }

    let graph_dir = args.graph.unwrap_or_else(|| config.graph_dir());
    let graph = load_graph(&graph_dir)
        .with_context(|| format!("Failed to load graph from {}", graph_dir.display()))?;
    let dataset = build_link_dataset(&graph, &dataset_config)?;

    let out = args.out.unwrap_or_else(|| config.dataset_dir());
    write_dataset(&dataset, &out).with_context(|| format!("Failed to write {}", out.display()))?;

    let s = &dataset.stats;
    println!();
    println!("Dataset written to {}", out.display());
    println!("{}", "─".repeat(50));
    println!("Nodes:        {:>8}", s.nodes);
    println!("Edges:        {:>8}", s.edges);
    println!("Train:        {:>8} positive, {} negative", s.train_positives, s.train_negatives);
    println!("Test:         {:>8} positive, {} negative", s.test_positives, s.test_negatives);
    if s.negative_shortfall > 0 {
        println!("Shortfall:    {:>8}", s.negative_shortfall);
    }
    println!("{}", "─".repeat(50));
    println!();
    Ok(())
}
