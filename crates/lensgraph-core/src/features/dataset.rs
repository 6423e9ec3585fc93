use crate::error::{LensGraphError, Result};
use crate::features::NeighborIndex;
use crate::merge::Graph;
use crate::types::AccountKey;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

/// Which relation positives are drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkTarget {
    /// Follow edges, follower → following.
    Follows,
    /// Engagements projected onto accounts, actor → author of the engaged post.
    Engagements,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitStrategy {
    /// Seeded shuffle of node pairs.
    Random,
    /// Most recent pairs go to test. Undated pairs count as oldest.
    Temporal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatasetConfig {
    /// Negatives drawn per positive. Default: 1.
    pub negative_ratio: usize,

    /// Share of node pairs held out for test. Default: 0.2.
    pub test_ratio: f64,

    /// Seed for the split shuffle and negative sampling. Default: 42.
    pub seed: u64,

    pub split: SplitStrategy,

    pub target: LinkTarget,

    /// Sampling attempts allowed per requested negative before giving up.
    pub max_attempts: usize,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            negative_ratio: 1,
            test_ratio: 0.2,
            seed: 42,
            split: SplitStrategy::Random,
            target: LinkTarget::Follows,
            max_attempts: 100,
        }
    }
}

impl DatasetConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_negative_ratio(mut self, ratio: usize) -> Self {
        self.negative_ratio = ratio;
        self
    }

    pub fn with_test_ratio(mut self, ratio: f64) -> Self {
        self.test_ratio = ratio;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_split(mut self, split: SplitStrategy) -> Self {
        self.split = split;
        self
    }

    pub fn with_target(mut self, target: LinkTarget) -> Self {
        self.target = target;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.test_ratio) {
            return Err(LensGraphError::Validation(format!(
                "test_ratio {} out of range [0.0, 1.0)",
                self.test_ratio
            )));
        }
        if self.max_attempts == 0 {
            return Err(LensGraphError::Validation("max_attempts must be > 0".into()));
        }
        Ok(())
    }
}

/// An observed directed link between two accounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositiveLink {
    pub source: AccountKey,
    pub target: AccountKey,
    pub observed_at: Option<DateTime<Utc>>,
}

/// One labelled candidate pair with its features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRow {
    pub source: AccountKey,
    pub target: AccountKey,
    pub common_neighbors: usize,
    pub jaccard: f64,
    pub adamic_adar: f64,
    pub resource_allocation: f64,
    pub preferential_attachment: usize,
    /// 1 for an observed link, 0 for a sampled non-link.
    pub label: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetStats {
    pub nodes: usize,
    pub edges: usize,
    pub train_positives: usize,
    pub train_negatives: usize,
    pub test_positives: usize,
    pub test_negatives: usize,
    /// Negatives that could not be drawn within the attempt budget.
    pub negative_shortfall: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkDataset {
    pub train: Vec<LinkRow>,
    pub test: Vec<LinkRow>,
    pub stats: DatasetStats,
}

type Pair = (AccountKey, AccountKey);

const CSV_HEADER: [&str; 8] = [
    "source",
    "target",
    "common_neighbors",
    "jaccard",
    "adamic_adar",
    "resource_allocation",
    "preferential_attachment",
    "label",
];

fn unordered(u: &str, v: &str) -> Pair {
    if u <= v {
        (u.to_string(), v.to_string())
    } else {
        (v.to_string(), u.to_string())
    }
}

/// Observed links of the chosen kind, deduplicated, without self-links, in
/// key order.
pub fn positive_links(graph: &Graph, target: LinkTarget) -> Vec<PositiveLink> {
    let mut links: BTreeMap<Pair, Option<DateTime<Utc>>> = BTreeMap::new();
    match target {
        LinkTarget::Follows => {
            for f in graph.follows.values() {
                if f.follower != f.following {
                    links.insert((f.follower.clone(), f.following.clone()), f.followed_on);
                }
            }
        }
        LinkTarget::Engagements => {
            for e in graph.engagements.values() {
                let Some(author) = graph.author_of(&e.target) else {
                    continue;
                };
                if author == &e.actor {
                    continue;
                }
                // Earliest engagement dates the link.
                let at = links
                    .entry((e.actor.clone(), author.clone()))
                    .or_insert(e.timestamp);
                *at = match (*at, e.timestamp) {
                    (Some(prev), Some(ts)) => Some(prev.min(ts)),
                    (prev, ts) => prev.or(ts),
                };
            }
        }
    }
    links
        .into_iter()
        .map(|((source, target), observed_at)| PositiveLink {
            source,
            target,
            observed_at,
        })
        .collect()
}

/// Build a labelled train/test table for link prediction from `graph`.
///
/// Positives are split by unordered node pair, so a link and its reverse always
/// land in the same partition. Each positive gets `negative_ratio` negatives
/// sharing its source, drawn by rejection sampling: never adjacent, never the
/// source itself, never drawn twice. Features use the undirected neighbor sets
/// of the whole positive relation.
pub fn build_link_dataset(graph: &Graph, config: &DatasetConfig) -> Result<LinkDataset> {
    config.validate()?;

    let positives = positive_links(graph, config.target);
    let index = NeighborIndex::from_edges(
        positives
            .iter()
            .map(|l| (l.source.as_str(), l.target.as_str())),
    );

    let mut rng = StdRng::seed_from_u64(config.seed);
    let test_pairs = split_pairs(&positives, config, &mut rng);

    let (mut train_pos, mut test_pos) = (Vec::new(), Vec::new());
    for link in &positives {
        let pair = (link.source.clone(), link.target.clone());
        if test_pairs.contains(&unordered(&link.source, &link.target)) {
            test_pos.push(pair);
        } else {
            train_pos.push(pair);
        }
    }

    let mut sampler = NegativeSampler {
        index: &index,
        population: index.nodes().collect(),
        config,
        rng,
        drawn: HashSet::new(),
        shortfall: 0,
    };
    let train_neg = sampler.sample(&train_pos);
    let test_neg = sampler.sample(&test_pos);
    let shortfall = sampler.shortfall;
    if shortfall > 0 {
        log::warn!(
            "Could not draw {} negatives within {} attempts each",
            shortfall,
            config.max_attempts
        );
    }

    let stats = DatasetStats {
        nodes: index.node_count(),
        edges: index.edge_count(),
        train_positives: train_pos.len(),
        train_negatives: train_neg.len(),
        test_positives: test_pos.len(),
        test_negatives: test_neg.len(),
        negative_shortfall: shortfall,
    };

    let train = rows(&index, &train_pos, &train_neg);
    let test = rows(&index, &test_pos, &test_neg);

    log::info!(
        "Link dataset: {} train rows, {} test rows over {} nodes",
        train.len(),
        test.len(),
        stats.nodes
    );
    Ok(LinkDataset { train, test, stats })
}

/// Unordered pairs assigned to test.
fn split_pairs(
    positives: &[PositiveLink],
    config: &DatasetConfig,
    rng: &mut StdRng,
) -> BTreeSet<Pair> {
    let mut pairs: BTreeMap<Pair, Option<DateTime<Utc>>> = BTreeMap::new();
    for link in positives {
        let at = pairs
            .entry(unordered(&link.source, &link.target))
            .or_insert(link.observed_at);
        *at = (*at).max(link.observed_at);
    }

    let test_count = (pairs.len() as f64 * config.test_ratio).round() as usize;
    let mut ordered: Vec<(Pair, Option<DateTime<Utc>>)> = pairs.into_iter().collect();
    match config.split {
        SplitStrategy::Random => ordered.shuffle(rng),
        // Stable: equal stamps keep key order.
        SplitStrategy::Temporal => ordered.sort_by(|a, b| b.1.cmp(&a.1)),
    }
    ordered
        .into_iter()
        .take(test_count)
        .map(|(pair, _)| pair)
        .collect()
}

/// Rejection sampler for non-links. Drawn pairs are remembered across
/// partitions, so no negative appears twice in the dataset.
struct NegativeSampler<'a> {
    index: &'a NeighborIndex,
    population: Vec<&'a String>,
    config: &'a DatasetConfig,
    rng: StdRng,
    drawn: HashSet<Pair>,
    shortfall: usize,
}

impl NegativeSampler<'_> {
    fn sample(&mut self, positives: &[Pair]) -> Vec<Pair> {
        let mut negatives = Vec::new();
        for (source, _) in positives {
            for _ in 0..self.config.negative_ratio {
                match self.draw(source) {
                    Some(target) => negatives.push((source.clone(), target)),
                    None => self.shortfall += 1,
                }
            }
        }
        negatives
    }

    fn draw(&mut self, source: &str) -> Option<AccountKey> {
        if self.population.is_empty() {
            return None;
        }
        for _ in 0..self.config.max_attempts {
            let candidate = self.population[self.rng.gen_range(0..self.population.len())];
            if candidate == source || self.index.contains_edge(source, candidate) {
                continue;
            }
            if self.drawn.insert(unordered(source, candidate)) {
                return Some(candidate.clone());
            }
        }
        None
    }
}

fn rows(index: &NeighborIndex, positives: &[Pair], negatives: &[Pair]) -> Vec<LinkRow> {
    let labelled: Vec<(&Pair, u8)> = positives
        .iter()
        .map(|p| (p, 1))
        .chain(negatives.iter().map(|p| (p, 0)))
        .collect();

    labelled
        .par_iter()
        .map(|((u, v), label)| {
            let f = index.features(u, v);
            LinkRow {
                source: u.clone(),
                target: v.clone(),
                common_neighbors: f.common_neighbors,
                jaccard: f.jaccard,
                adamic_adar: f.adamic_adar,
                resource_allocation: f.resource_allocation,
                preferential_attachment: f.preferential_attachment,
                label: *label,
            }
        })
        .collect()
}

/// Write `train.csv`, `test.csv` and `dataset_summary.json` into `dir`.
pub fn write_dataset(dataset: &LinkDataset, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    for (name, rows) in [("train.csv", &dataset.train), ("test.csv", &dataset.test)] {
        let mut writer = csv::Writer::from_path(dir.join(name))?;
        if rows.is_empty() {
            writer.write_record(CSV_HEADER)?;
        }
        for row in rows.iter() {
            writer.serialize(row)?;
        }
        writer.flush()?;
    }
    std::fs::write(
        dir.join("dataset_summary.json"),
        serde_json::to_vec_pretty(&dataset.stats)?,
    )?;
    Ok(())
}
