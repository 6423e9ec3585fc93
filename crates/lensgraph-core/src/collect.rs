//! One end-to-end collection run: listings, following edges, derived and
//! probed engagements, written out as a single snapshot.

use crate::cancel::CancelSignal;
use crate::config::CollectConfig;
use crate::error::FetchError;
use crate::fetch::{Fetcher, PageSource, QueryShape};
use crate::ingest;
use crate::merge::EntityCounts;
use crate::probe::{EngagementProber, ProbeConfig, ProbeStop, ReconciliationSummary};
use crate::snapshot::{Snapshot, SnapshotStore};
use crate::types::{AccountKey, Post, PostKey};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

/// What a collection run gathered and where it stopped.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectionReport {
    /// Stamp of the written snapshot. `None` when nothing was collected.
    pub snapshot_id: Option<String>,
    pub files: Vec<PathBuf>,
    pub counts: EntityCounts,

    /// Per listing (`accounts`, `posts`, `following`): did it drain fully.
    /// `following` is true only when every account's listing drained.
    pub exhausted: BTreeMap<String, bool>,

    /// Raw items dropped at the ingestion boundary.
    pub rejected: usize,

    /// Accounts whose following listing failed transiently.
    pub failed_accounts: Vec<AccountKey>,

    /// Posts whose references could not be probed.
    pub failed_posts: Vec<PostKey>,

    /// Transient failures of the top-level listings.
    pub listing_errors: Vec<String>,

    pub reconciliation: ReconciliationSummary,
    pub probe_stop: Option<ProbeStop>,
    pub probe_pending: usize,
    pub cancelled: bool,

    /// The fatal error that ended the run early. Whatever was collected
    /// before it is still written.
    pub aborted: Option<String>,

    /// Why the snapshot could not be written. Counts above still describe
    /// what was collected.
    pub write_error: Option<String>,
}

impl CollectionReport {
    pub fn is_complete(&self) -> bool {
        self.aborted.is_none()
            && self.write_error.is_none()
            && !self.cancelled
            && self.failed_accounts.is_empty()
            && self.failed_posts.is_empty()
            && self.listing_errors.is_empty()
    }
}

enum Drain {
    Exhausted,
    Stopped,
    Failed(FetchError),
}

/// Runs collections against one upstream and writes the results into a
/// [`SnapshotStore`].
pub struct Collector<S: PageSource> {
    fetcher: Arc<Fetcher<S>>,
    prober: EngagementProber<S>,
    store: SnapshotStore,
    config: CollectConfig,
    resume: bool,
}

impl<S: PageSource> Collector<S> {
    pub fn new(
        fetcher: Arc<Fetcher<S>>,
        store: SnapshotStore,
        config: CollectConfig,
        probe: ProbeConfig,
    ) -> Self {
        Self {
            prober: EngagementProber::new(fetcher.clone(), probe),
            fetcher,
            store,
            config,
            resume: false,
        }
    }

    /// Continue listings from stored checkpoints instead of starting over.
    /// Pages before a checkpoint belong to the snapshot of the run that
    /// saved it.
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Collect once and write a snapshot, even when the run ends early.
    /// Failures, including a failed write, are reported rather than returned.
    pub async fn run(&self, cancel: &CancelSignal) -> CollectionReport {
        self.run_at(Utc::now(), cancel).await
    }

    /// Like [`run`](Self::run), stamping the snapshot with `collected_at`.
    pub async fn run_at(
        &self,
        collected_at: DateTime<Utc>,
        cancel: &CancelSignal,
    ) -> CollectionReport {
        let mut snapshot = Snapshot::new(collected_at);
        let mut report = CollectionReport::default();

        log::info!(
            "Starting collection {} (resume: {})",
            snapshot.id,
            self.resume
        );
        self.collect(&mut snapshot, &mut report, cancel).await;
        report.cancelled = cancel.is_cancelled();

        let derived = ingest::derive_engagements(&snapshot.posts);
        log::info!("Derived {} engagements from post parents", derived.len());
        snapshot.engagements.extend(derived);

        let dropped = snapshot.dedup();
        if dropped > 0 {
            log::debug!("Dropped {} repeated records", dropped);
        }
        report.counts = EntityCounts {
            accounts: snapshot.accounts.len(),
            posts: snapshot.posts.len(),
            follows: snapshot.follows.len(),
            engagements: snapshot.engagements.len(),
        };

        if snapshot.is_empty() {
            log::warn!("Collection {} gathered nothing; no snapshot written", snapshot.id);
        } else {
            match self.store.write_next(&mut snapshot) {
                Ok(files) => {
                    report.files = files;
                    report.snapshot_id = Some(snapshot.id.clone());
                }
                Err(e) => {
                    log::error!("Failed to write snapshot {}: {}", snapshot.id, e);
                    report.write_error = Some(e.to_string());
                }
            }
        }

        if let Some(reason) = &report.aborted {
            log::warn!("Collection {} aborted: {}", snapshot.id, reason);
        }
        report
    }

    async fn collect(
        &self,
        snapshot: &mut Snapshot,
        report: &mut CollectionReport,
        cancel: &CancelSignal,
    ) {
        for (shape, cap) in [
            (QueryShape::Accounts, self.config.max_accounts),
            (QueryShape::Posts, self.config.max_posts),
        ] {
            if cancel.is_cancelled() {
                return;
            }
            let key = shape.policy_key().to_string();
            match self.drain(shape, cap, snapshot, report, cancel).await {
                Drain::Exhausted => {
                    report.exhausted.insert(key, true);
                }
                Drain::Stopped => {
                    report.exhausted.insert(key, false);
                }
                Drain::Failed(e) if e.is_transient() => {
                    log::warn!("Listing {} failed: {}", key, e);
                    report.exhausted.insert(key, false);
                    report.listing_errors.push(e.to_string());
                }
                Drain::Failed(e) => {
                    report.exhausted.insert(key, false);
                    report.aborted = Some(e.to_string());
                    return;
                }
            }
        }

        let accounts: Vec<AccountKey> = snapshot.accounts.iter().map(|a| a.key.clone()).collect();
        let mut following_done = true;
        for account in accounts {
            if cancel.is_cancelled() {
                following_done = false;
                break;
            }
            let shape = QueryShape::Following {
                account: account.clone(),
            };
            match self
                .drain(shape, self.config.follows_per_account, snapshot, report, cancel)
                .await
            {
                Drain::Exhausted => {}
                Drain::Stopped => following_done = false,
                Drain::Failed(e) if e.is_transient() => {
                    log::warn!("Following of {} failed: {}", account, e);
                    following_done = false;
                    report.failed_accounts.push(account);
                }
                Drain::Failed(e) => {
                    report.exhausted.insert("following".to_string(), false);
                    report.aborted = Some(e.to_string());
                    return;
                }
            }
        }
        report
            .exhausted
            .insert("following".to_string(), following_done);

        if self.config.probe_seed_posts == 0 || cancel.is_cancelled() {
            return;
        }
        let seeds: Vec<Post> = snapshot
            .posts
            .iter()
            .take(self.config.probe_seed_posts)
            .cloned()
            .collect();
        if seeds.is_empty() {
            return;
        }

        let outcome = self.prober.probe(&seeds, cancel).await;
        let known: HashSet<PostKey> = snapshot.posts.iter().map(|p| p.key.clone()).collect();
        snapshot
            .posts
            .extend(outcome.posts.into_iter().filter(|p| !known.contains(&p.key)));
        snapshot.engagements.extend(outcome.engagements);

        report.reconciliation = outcome.reconciliation.iter().collect();
        report.failed_posts = outcome.failed.into_iter().map(|f| f.post).collect();
        report.probe_pending = outcome.pending.len();
        if let ProbeStop::Aborted { error } = &outcome.stop {
            report.aborted = Some(error.clone());
        }
        report.probe_stop = Some(outcome.stop);
    }

    async fn drain(
        &self,
        shape: QueryShape,
        max_items: usize,
        snapshot: &mut Snapshot,
        report: &mut CollectionReport,
        cancel: &CancelSignal,
    ) -> Drain {
        let resume_from = if self.resume {
            self.fetcher.stored_checkpoint(&shape)
        } else {
            None
        };
        let request = self
            .fetcher
            .request(shape)
            .with_max_items(max_items)
            .resume_from(resume_from);

        match self.fetcher.fetch_all(request, cancel).await {
            Ok(outcome) => {
                report.rejected += outcome.rejected;
                let exhausted = outcome.exhausted();
                snapshot.extend(outcome.records);
                if exhausted {
                    Drain::Exhausted
                } else {
                    Drain::Stopped
                }
            }
            Err(partial) => {
                report.rejected += partial.rejected;
                snapshot.extend(partial.records);
                Drain::Failed(partial.error)
            }
        }
    }
}
