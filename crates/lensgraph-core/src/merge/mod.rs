mod graph;
mod merger;

pub use graph::{load_graph, write_graph, EntityCounts, Graph, MergeSummary, SnapshotSource};
pub use merger::{merge, MergeConflict};
