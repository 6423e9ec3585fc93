mod checkpoint;
mod config;
mod fetcher;
mod limiter;
mod source;

pub use checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use config::{FetchConfig, FetchPolicy};
pub use fetcher::{FetchOutcome, FetchRequest, Fetcher, PartialFetch, StopReason};
pub use limiter::RateLimiter;
pub use source::{Cursor, Page, PageRequest, PageSource, QueryShape};

#[cfg(test)]
mod tests;
