mod dataset;
mod index;

pub use dataset::{
    build_link_dataset, positive_links, write_dataset, DatasetConfig, DatasetStats, LinkDataset,
    LinkRow, LinkTarget, PositiveLink, SplitStrategy,
};
pub use index::{NeighborIndex, PairFeatures};

#[cfg(test)]
mod tests;
