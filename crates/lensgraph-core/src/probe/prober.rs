use crate::cancel::CancelSignal;
use crate::error::FetchError;
use crate::fetch::{FetchOutcome, Fetcher, PageSource, QueryShape, StopReason};
use crate::probe::{reconcile, ProbeConfig, Reconciliation, ReconciliationStatus};
use crate::types::{Engagement, EngagementKind, EngagementTotals, Post, PostKey, Record};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Why a probe stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum ProbeStop {
    FrontierExhausted,
    PostBudget,
    EdgeBudget,
    Cancelled,
    /// A fatal upstream error ended the probe.
    Aborted { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeFailure {
    pub post: PostKey,
    pub reason: String,
}

/// Everything a probe discovered, including when it stopped early.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// Referencing posts discovered, ordered by key.
    pub posts: Vec<Post>,

    /// Engagement edges, ordered by `(referencing, kind)`.
    pub engagements: Vec<Engagement>,

    /// One entry per probed post, in visit order.
    pub reconciliation: Vec<Reconciliation>,

    pub failed: Vec<ProbeFailure>,

    /// Posts still waiting to be probed. Feed them back as seeds to continue.
    pub pending: Vec<PostKey>,

    pub stop: ProbeStop,
}

impl ProbeOutcome {
    pub fn probed(&self) -> usize {
        self.reconciliation.len()
    }
}

/// References for one frontier item after item-level retries.
enum ItemResult {
    Fetched(FetchOutcome),
    Failed {
        error: FetchError,
        records: Vec<Record>,
    },
}

/// Breadth-first expansion over the "is referenced by" relation, starting from
/// a set of seed posts.
pub struct EngagementProber<S: PageSource> {
    fetcher: Arc<Fetcher<S>>,
    config: ProbeConfig,
}

impl<S: PageSource> EngagementProber<S> {
    pub fn new(fetcher: Arc<Fetcher<S>>, config: ProbeConfig) -> Self {
        Self { fetcher, config }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Probe the reference subgraph below `seeds`.
    ///
    /// Seed totals are what reconciliation compares against; posts discovered
    /// on the way carry whatever totals the upstream attached to them.
    pub async fn probe(&self, seeds: &[Post], cancel: &CancelSignal) -> ProbeOutcome {
        let mut frontier: VecDeque<(PostKey, u32)> = VecDeque::new();
        let mut queued: HashSet<PostKey> = HashSet::new();
        let mut visited: HashSet<PostKey> = HashSet::new();
        let mut totals: HashMap<PostKey, EngagementTotals> = HashMap::new();
        let mut posts: BTreeMap<PostKey, Post> = BTreeMap::new();
        let mut edges: BTreeMap<(PostKey, EngagementKind), Engagement> = BTreeMap::new();
        let mut probed: Vec<(PostKey, bool)> = Vec::new();
        let mut failed: Vec<ProbeFailure> = Vec::new();
        let mut requeue: Vec<PostKey> = Vec::new();

        for seed in seeds {
            if let Some(t) = seed.totals {
                totals.entry(seed.key.clone()).or_insert(t);
            }
            if queued.insert(seed.key.clone()) {
                frontier.push_back((seed.key.clone(), 0));
            }
        }

        let stop = loop {
            if cancel.is_cancelled() {
                break ProbeStop::Cancelled;
            }
            if frontier.is_empty() {
                break ProbeStop::FrontierExhausted;
            }
            if visited.len() >= self.config.max_posts {
                break ProbeStop::PostBudget;
            }
            if edges.len() >= self.config.max_edges {
                break ProbeStop::EdgeBudget;
            }

            let mut batch = Vec::new();
            while batch.len() < self.config.workers && visited.len() < self.config.max_posts {
                let Some((key, depth)) = frontier.pop_front() else {
                    break;
                };
                if visited.insert(key.clone()) {
                    batch.push((key, depth));
                }
            }
            if batch.is_empty() {
                break ProbeStop::FrontierExhausted;
            }

            let results = join_all(batch.iter().map(|(key, _)| self.probe_post(key, cancel))).await;

            let mut fatal = None;
            for ((key, depth), result) in batch.into_iter().zip(results) {
                let (records, truncated) = match result {
                    Ok(ItemResult::Fetched(outcome)) if outcome.stop == StopReason::Cancelled => {
                        // Interrupted mid-listing: keep what arrived, probe again later.
                        visited.remove(&key);
                        requeue.push(key.clone());
                        (outcome.records, None)
                    }
                    Ok(ItemResult::Fetched(outcome)) => {
                        let truncated = !outcome.exhausted();
                        (outcome.records, Some(truncated))
                    }
                    Ok(ItemResult::Failed { error, records }) | Err((error, records)) => {
                        log::warn!("Probe of {} failed: {}", key, error);
                        failed.push(ProbeFailure {
                            post: key.clone(),
                            reason: error.to_string(),
                        });
                        if !error.is_transient() && fatal.is_none() {
                            fatal = Some(error.to_string());
                        }
                        (records, None)
                    }
                };

                for record in records {
                    match record {
                        Record::Engagement(edge) => {
                            let child = edge.referencing.clone();
                            let expands = edge.kind.carries_content();
                            edges.entry(edge.key()).or_insert(edge);
                            let within_depth =
                                self.config.max_depth.map_or(true, |max| depth < max);
                            if expands && within_depth && queued.insert(child.clone()) {
                                frontier.push_back((child, depth + 1));
                            }
                        }
                        Record::Post(post) => {
                            if let Some(t) = post.totals {
                                totals.entry(post.key.clone()).or_insert(t);
                            }
                            posts.entry(post.key.clone()).or_insert(post);
                        }
                        Record::Account(_) | Record::Follow(_) => {}
                    }
                }

                if let Some(truncated) = truncated {
                    probed.push((key, truncated));
                }
            }

            if let Some(error) = fatal {
                break ProbeStop::Aborted { error };
            }
        };

        let mut observed: HashMap<&str, BTreeMap<EngagementKind, u64>> = HashMap::new();
        for edge in edges.values() {
            *observed
                .entry(edge.target.as_str())
                .or_default()
                .entry(edge.kind)
                .or_insert(0) += 1;
        }

        let empty = BTreeMap::new();
        let kinds = self.fetcher.source().reference_kinds();
        let mut reconciliation: Vec<Reconciliation> = probed
            .iter()
            .map(|(key, truncated)| {
                reconcile(
                    key,
                    totals.get(key),
                    observed.get(key.as_str()).unwrap_or(&empty),
                    kinds,
                    *truncated,
                )
            })
            .collect();
        reconciliation.extend(failed.iter().map(|f| Reconciliation {
            post: f.post.clone(),
            status: ReconciliationStatus::Failed,
            kinds: Vec::new(),
            truncated: false,
        }));

        let pending: Vec<PostKey> = requeue
            .into_iter()
            .chain(
                frontier
                    .into_iter()
                    .map(|(key, _)| key)
                    .filter(|key| !visited.contains(key)),
            )
            .collect();

        log::info!(
            "Probe finished ({:?}): {} posts probed, {} failed, {} edges, {} pending",
            stop,
            probed.len(),
            failed.len(),
            edges.len(),
            pending.len()
        );

        ProbeOutcome {
            posts: posts.into_values().collect(),
            engagements: edges.into_values().collect(),
            reconciliation,
            failed,
            pending,
            stop,
        }
    }

    /// Fetch all references of one post. Transient failures are retried from
    /// the last good checkpoint up to `item_retries` times.
    async fn probe_post(
        &self,
        key: &PostKey,
        cancel: &CancelSignal,
    ) -> Result<ItemResult, (FetchError, Vec<Record>)> {
        let shape = QueryShape::References { post: key.clone() };
        let mut carried: Vec<Record> = Vec::new();
        let mut resume = None;
        let mut attempt = 0u32;

        loop {
            let request = self
                .fetcher
                .request(shape.clone())
                .with_max_items(self.config.max_refs_per_post)
                .resume_from(resume.take());

            match self.fetcher.fetch_all(request, cancel).await {
                Ok(mut outcome) => {
                    carried.append(&mut outcome.records);
                    outcome.records = carried;
                    return Ok(ItemResult::Fetched(outcome));
                }
                Err(partial) => {
                    carried.extend(partial.records);
                    if partial.error.is_transient() && attempt < self.config.item_retries {
                        attempt += 1;
                        log::debug!(
                            "Retrying references of {} ({}/{}): {}",
                            key,
                            attempt,
                            self.config.item_retries,
                            partial.error
                        );
                        resume = partial.checkpoint;
                        continue;
                    }
                    if partial.error.is_transient() {
                        return Ok(ItemResult::Failed {
                            error: partial.error,
                            records: carried,
                        });
                    }
                    return Err((partial.error, carried));
                }
            }
        }
    }
}
