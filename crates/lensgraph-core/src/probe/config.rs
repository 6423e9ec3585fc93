use crate::error::{LensGraphError, Result};
use serde::{Deserialize, Serialize};

/// Engagement prober settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProbeConfig {
    /// Frontier items probed concurrently. All workers share one rate limiter.
    pub workers: usize,

    /// Extra attempts for a post whose references fail transiently.
    pub item_retries: u32,

    /// Stop after this many posts have been probed.
    pub max_posts: usize,

    /// Stop once this many engagement edges have been discovered.
    pub max_edges: usize,

    /// Maximum reference depth below the seeds. `None` = unbounded.
    pub max_depth: Option<u32>,

    /// Soft cap on references fetched per post.
    pub max_refs_per_post: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            item_retries: 2,
            max_posts: 5_000,
            max_edges: 50_000,
            max_depth: None,
            max_refs_per_post: 1_000,
        }
    }
}

impl ProbeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_item_retries(mut self, retries: u32) -> Self {
        self.item_retries = retries;
        self
    }

    pub fn with_max_posts(mut self, max_posts: usize) -> Self {
        self.max_posts = max_posts;
        self
    }

    pub fn with_max_edges(mut self, max_edges: usize) -> Self {
        self.max_edges = max_edges;
        self
    }

    pub fn with_max_depth(mut self, max_depth: Option<u32>) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_max_refs_per_post(mut self, max_refs: usize) -> Self {
        self.max_refs_per_post = max_refs;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(LensGraphError::Validation("probe workers must be > 0".into()));
        }
        if self.max_refs_per_post == 0 {
            return Err(LensGraphError::Validation(
                "max_refs_per_post must be > 0".into(),
            ));
        }
        Ok(())
    }
}
