mod config;
mod prober;
mod reconcile;

pub use config::ProbeConfig;
pub use prober::{EngagementProber, ProbeFailure, ProbeOutcome, ProbeStop};
pub use reconcile::{
    reconcile, KindCount, Reconciliation, ReconciliationStatus, ReconciliationSummary,
};
