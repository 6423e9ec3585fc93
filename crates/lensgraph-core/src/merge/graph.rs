use crate::error::{LensGraphError, Result};
use crate::merge::MergeConflict;
use crate::types::{
    Account, AccountKey, Engagement, EngagementKind, Follow, Post, PostKey,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

pub const ACCOUNTS_FILE: &str = "nodes_accounts.jsonl";
pub const POSTS_FILE: &str = "nodes_posts.jsonl";
pub const FOLLOWS_FILE: &str = "edges_follows.jsonl";
pub const ENGAGEMENTS_FILE: &str = "edges_engagements.jsonl";
pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    pub accounts: usize,
    pub posts: usize,
    pub follows: usize,
    pub engagements: usize,
}

/// One merged input snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSource {
    pub id: String,
    pub collected_at: DateTime<Utc>,
    pub counts: EntityCounts,
}

/// Counts and provenance of a merged graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeSummary {
    pub counts: EntityCounts,
    /// Synthetic placeholder accounts.
    pub stub_accounts: usize,
    /// Synthetic placeholder posts.
    pub stub_posts: usize,
    /// Input snapshots, oldest first.
    pub sources: Vec<SnapshotSource>,
    pub conflicts: Vec<MergeConflict>,
}

/// Canonical, deduplicated node and edge collections.
///
/// Every reference resolves: post authors and edge endpoints are either real
/// or synthetic nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    pub accounts: BTreeMap<AccountKey, Account>,
    pub posts: BTreeMap<PostKey, Post>,
    pub follows: BTreeMap<(AccountKey, AccountKey), Follow>,
    pub engagements: BTreeMap<(PostKey, EngagementKind), Engagement>,
    pub summary: MergeSummary,
}

impl Graph {
    pub fn counts(&self) -> EntityCounts {
        EntityCounts {
            accounts: self.accounts.len(),
            posts: self.posts.len(),
            follows: self.follows.len(),
            engagements: self.engagements.len(),
        }
    }

    /// Author of `post`, when known.
    pub fn author_of(&self, post: &str) -> Option<&AccountKey> {
        self.posts.get(post)?.author.as_ref()
    }

    /// First dangling reference, if any.
    pub fn dangling(&self) -> Option<String> {
        let missing_account = |k: &AccountKey| !self.accounts.contains_key(k);
        let missing_post = |k: &PostKey| !self.posts.contains_key(k);

        for post in self.posts.values() {
            if let Some(author) = post.author.as_ref().filter(|a| missing_account(a)) {
                return Some(format!("post {} author {}", post.key, author));
            }
        }
        for f in self.follows.values() {
            if missing_account(&f.follower) || missing_account(&f.following) {
                return Some(format!("follow {}->{}", f.follower, f.following));
            }
        }
        for e in self.engagements.values() {
            if missing_account(&e.actor) || missing_post(&e.target) || missing_post(&e.referencing)
            {
                return Some(format!("engagement {}#{}", e.referencing, e.kind));
            }
        }
        None
    }
}

/// Write `graph` into `dir` as newline-delimited records plus `summary.json`.
/// Output is byte-identical for identical graphs.
pub fn write_graph(graph: &Graph, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    write_jsonl(&dir.join(ACCOUNTS_FILE), graph.accounts.values())?;
    write_jsonl(&dir.join(POSTS_FILE), graph.posts.values())?;
    write_jsonl(&dir.join(FOLLOWS_FILE), graph.follows.values())?;
    write_jsonl(&dir.join(ENGAGEMENTS_FILE), graph.engagements.values())?;

    let mut summary = serde_json::to_vec_pretty(&graph.summary)?;
    summary.push(b'\n');
    std::fs::write(dir.join(SUMMARY_FILE), summary)?;

    log::info!(
        "Wrote graph to {} ({} accounts, {} posts, {} follows, {} engagements)",
        dir.display(),
        graph.accounts.len(),
        graph.posts.len(),
        graph.follows.len(),
        graph.engagements.len()
    );
    Ok(())
}

/// Read a graph directory written by [`write_graph`].
pub fn load_graph(dir: &Path) -> Result<Graph> {
    let summary_path = dir.join(SUMMARY_FILE);
    if !summary_path.exists() {
        return Err(LensGraphError::Validation(format!(
            "{} is not a graph directory (no {})",
            dir.display(),
            SUMMARY_FILE
        )));
    }
    let summary: MergeSummary = serde_json::from_slice(&std::fs::read(summary_path)?)?;

    let accounts: Vec<Account> = read_jsonl(&dir.join(ACCOUNTS_FILE))?;
    let posts: Vec<Post> = read_jsonl(&dir.join(POSTS_FILE))?;
    let follows: Vec<Follow> = read_jsonl(&dir.join(FOLLOWS_FILE))?;
    let engagements: Vec<Engagement> = read_jsonl(&dir.join(ENGAGEMENTS_FILE))?;

    Ok(Graph {
        accounts: accounts.into_iter().map(|a| (a.key.clone(), a)).collect(),
        posts: posts.into_iter().map(|p| (p.key.clone(), p)).collect(),
        follows: follows.into_iter().map(|f| (f.key(), f)).collect(),
        engagements: engagements.into_iter().map(|e| (e.key(), e)).collect(),
        summary,
    })
}

fn write_jsonl<'a, T, I>(path: &Path, records: I) -> Result<()>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut out = BufWriter::new(std::fs::File::create(path)?);
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}
