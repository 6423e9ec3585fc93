pub mod types;
pub mod error;
pub mod cancel;
pub mod ingest;
pub mod fetch;
pub mod probe;
pub mod snapshot;
pub mod merge;
pub mod features;
pub mod sink;
pub mod config;
pub mod collect;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{FetchError, LensGraphError, RecordError, Result, UpstreamError};
pub use types::*;
pub use cancel::CancelSignal;
pub use fetch::{
    Checkpoint, CheckpointStore, Cursor, FetchConfig, FetchOutcome, FetchPolicy, FetchRequest,
    Fetcher, FileCheckpointStore, MemoryCheckpointStore, Page, PageRequest, PageSource,
    PartialFetch, QueryShape, RateLimiter, StopReason,
};
pub use probe::{
    reconcile, EngagementProber, ProbeConfig, ProbeFailure, ProbeOutcome, ProbeStop,
    Reconciliation, ReconciliationStatus, ReconciliationSummary,
};
pub use snapshot::{LoadedSnapshots, Snapshot, SnapshotStore};
pub use merge::{load_graph, merge, write_graph, EntityCounts, Graph, MergeConflict, MergeSummary};
pub use features::{
    build_link_dataset, positive_links, write_dataset, DatasetConfig, DatasetStats, LinkDataset,
    LinkRow, LinkTarget, NeighborIndex, PairFeatures, SplitStrategy,
};
pub use sink::{publish, MemorySink, PublishReport, RecordSink, RedbSink};
pub use config::{CollectConfig, PipelineConfig, UpstreamConfig};
pub use collect::{CollectionReport, Collector};
