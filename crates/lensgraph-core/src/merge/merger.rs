use crate::merge::{EntityCounts, Graph, MergeSummary, SnapshotSource};
use crate::snapshot::Snapshot;
use crate::types::{Account, Engagement, EngagementKind, EntityType, Follow, Post, PostKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Two snapshots disagreed on a field that should never change. The later
/// snapshot's value was kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConflict {
    pub entity: EntityType,
    pub key: String,
    pub field: String,
    pub previous: String,
    pub kept: String,
    /// Snapshot whose value was kept.
    pub snapshot: String,
}

/// Where a field update is being applied, for conflict reporting.
struct Site<'a> {
    entity: EntityType,
    key: &'a str,
    snapshot: &'a str,
    conflicts: &'a mut Vec<MergeConflict>,
}

impl Site<'_> {
    /// Last observation wins, absent values never erase.
    fn mutable<T>(&mut self, slot: &mut Option<T>, incoming: Option<T>) {
        if incoming.is_some() {
            *slot = incoming;
        }
    }

    /// Fills a missing value. A differing value is a conflict; the later one is kept.
    fn immutable<T: PartialEq + Debug>(
        &mut self,
        field: &str,
        slot: &mut Option<T>,
        incoming: Option<T>,
    ) {
        match (slot.as_ref(), incoming) {
            (_, None) => {}
            (Some(prev), Some(next)) if prev != &next => {
                let conflict = MergeConflict {
                    entity: self.entity,
                    key: self.key.to_string(),
                    field: field.to_string(),
                    previous: format!("{:?}", prev),
                    kept: format!("{:?}", next),
                    snapshot: self.snapshot.to_string(),
                };
                log::warn!(
                    "Merge conflict on {} {} field {}: {} -> {} (snapshot {})",
                    conflict.entity,
                    conflict.key,
                    conflict.field,
                    conflict.previous,
                    conflict.kept,
                    conflict.snapshot
                );
                self.conflicts.push(conflict);
                *slot = Some(next);
            }
            (_, Some(next)) => *slot = Some(next),
        }
    }
}

/// Merge snapshots into one canonical graph.
///
/// Snapshots are applied oldest first (by collection time, then id), so the
/// result does not depend on input order, and a snapshot listed twice counts
/// once. Membership only grows; later observations overwrite mutable fields.
/// Dangling references are materialized as synthetic stubs.
pub fn merge(snapshots: &[Snapshot]) -> Graph {
    let mut ordered: Vec<&Snapshot> = snapshots.iter().collect();
    ordered.sort_by(|a, b| (a.collected_at, &a.id).cmp(&(b.collected_at, &b.id)));
    ordered.dedup_by(|a, b| a.id == b.id);

    let mut graph = Graph::default();
    let mut conflicts = Vec::new();
    let mut sources = Vec::with_capacity(ordered.len());

    for snapshot in ordered {
        for account in &snapshot.accounts {
            merge_account(&mut graph.accounts, account, &snapshot.id, &mut conflicts);
        }
        for post in &snapshot.posts {
            merge_post(&mut graph.posts, post, &snapshot.id, &mut conflicts);
        }
        for follow in &snapshot.follows {
            merge_follow(&mut graph.follows, follow, &snapshot.id, &mut conflicts);
        }
        for engagement in &snapshot.engagements {
            merge_engagement(&mut graph.engagements, engagement, &snapshot.id, &mut conflicts);
        }
        sources.push(SnapshotSource {
            id: snapshot.id.clone(),
            collected_at: snapshot.collected_at,
            counts: EntityCounts {
                accounts: snapshot.accounts.len(),
                posts: snapshot.posts.len(),
                follows: snapshot.follows.len(),
                engagements: snapshot.engagements.len(),
            },
        });
    }

    synthesize_stubs(&mut graph);

    graph.summary = MergeSummary {
        counts: graph.counts(),
        stub_accounts: graph.accounts.values().filter(|a| a.synthetic).count(),
        stub_posts: graph.posts.values().filter(|p| p.synthetic).count(),
        sources,
        conflicts,
    };

    log::info!(
        "Merged {} snapshots: {} accounts ({} stubs), {} posts ({} stubs), {} follows, {} engagements, {} conflicts",
        graph.summary.sources.len(),
        graph.summary.counts.accounts,
        graph.summary.stub_accounts,
        graph.summary.counts.posts,
        graph.summary.stub_posts,
        graph.summary.counts.follows,
        graph.summary.counts.engagements,
        graph.summary.conflicts.len()
    );
    graph
}

fn merge_account(
    accounts: &mut BTreeMap<String, Account>,
    incoming: &Account,
    snapshot: &str,
    conflicts: &mut Vec<MergeConflict>,
) {
    let Some(existing) = accounts.get_mut(&incoming.key) else {
        accounts.insert(incoming.key.clone(), incoming.clone());
        return;
    };
    let mut site = Site {
        entity: EntityType::Accounts,
        key: &incoming.key,
        snapshot,
        conflicts,
    };
    let incoming = incoming.clone();
    site.mutable(&mut existing.handle, incoming.handle);
    site.mutable(&mut existing.display_name, incoming.display_name);
    site.mutable(&mut existing.bio, incoming.bio);
    site.mutable(&mut existing.follower_count, incoming.follower_count);
    site.mutable(&mut existing.following_count, incoming.following_count);
    site.mutable(&mut existing.post_count, incoming.post_count);
    site.mutable(&mut existing.collected_at, incoming.collected_at);
    site.immutable("created_at", &mut existing.created_at, incoming.created_at);
    existing.synthetic &= incoming.synthetic;
}

fn merge_post(
    posts: &mut BTreeMap<String, Post>,
    incoming: &Post,
    snapshot: &str,
    conflicts: &mut Vec<MergeConflict>,
) {
    let Some(existing) = posts.get_mut(&incoming.key) else {
        posts.insert(incoming.key.clone(), incoming.clone());
        return;
    };
    let mut site = Site {
        entity: EntityType::Posts,
        key: &incoming.key,
        snapshot,
        conflicts,
    };
    let incoming = incoming.clone();
    site.mutable(&mut existing.totals, incoming.totals);
    site.mutable(&mut existing.content_uri, incoming.content_uri);
    site.mutable(&mut existing.collected_at, incoming.collected_at);
    site.immutable("author", &mut existing.author, incoming.author);
    site.immutable("created_at", &mut existing.created_at, incoming.created_at);
    site.immutable("parent", &mut existing.parent, incoming.parent);

    // An unknown kind is an absent observation, not a value.
    let known = |k: PostKind| (k != PostKind::Unknown).then_some(k);
    let mut kind = known(existing.kind);
    site.immutable("kind", &mut kind, known(incoming.kind));
    existing.kind = kind.unwrap_or(PostKind::Unknown);

    existing.synthetic &= incoming.synthetic;
}

fn merge_follow(
    follows: &mut BTreeMap<(String, String), Follow>,
    incoming: &Follow,
    snapshot: &str,
    conflicts: &mut Vec<MergeConflict>,
) {
    let key = incoming.key();
    let Some(existing) = follows.get_mut(&key) else {
        follows.insert(key, incoming.clone());
        return;
    };
    let label = format!("{}->{}", incoming.follower, incoming.following);
    let mut site = Site {
        entity: EntityType::Follows,
        key: &label,
        snapshot,
        conflicts,
    };
    site.immutable("followed_on", &mut existing.followed_on, incoming.followed_on);
}

fn merge_engagement(
    engagements: &mut BTreeMap<(String, EngagementKind), Engagement>,
    incoming: &Engagement,
    snapshot: &str,
    conflicts: &mut Vec<MergeConflict>,
) {
    let key = incoming.key();
    let Some(existing) = engagements.get_mut(&key) else {
        engagements.insert(key, incoming.clone());
        return;
    };
    let label = format!("{}#{}", incoming.referencing, incoming.kind);
    let mut site = Site {
        entity: EntityType::Engagements,
        key: &label,
        snapshot,
        conflicts,
    };

    let mut actor = Some(existing.actor.clone());
    site.immutable("actor", &mut actor, Some(incoming.actor.clone()));
    let mut target = Some(existing.target.clone());
    site.immutable("target", &mut target, Some(incoming.target.clone()));
    if let (Some(actor), Some(target)) = (actor, target) {
        existing.actor = actor;
        existing.target = target;
    }
    site.immutable("timestamp", &mut existing.timestamp, incoming.timestamp);
}

/// Give every dangling reference a synthetic node. Stub posts carry no author,
/// so one pass over the edges and posts is enough.
fn synthesize_stubs(graph: &mut Graph) {
    let mut missing_posts = Vec::new();
    let mut missing_accounts = Vec::new();

    for e in graph.engagements.values() {
        for post in [&e.target, &e.referencing] {
            if !graph.posts.contains_key(post) {
                missing_posts.push(post.clone());
            }
        }
        if !graph.accounts.contains_key(&e.actor) {
            missing_accounts.push(e.actor.clone());
        }
    }
    for key in missing_posts {
        graph
            .posts
            .entry(key.clone())
            .or_insert_with(|| Post::stub(key));
    }

    for post in graph.posts.values() {
        if let Some(author) = &post.author {
            if !graph.accounts.contains_key(author) {
                missing_accounts.push(author.clone());
            }
        }
    }
    for f in graph.follows.values() {
        for account in [&f.follower, &f.following] {
            if !graph.accounts.contains_key(account) {
                missing_accounts.push(account.clone());
            }
        }
    }
    for key in missing_accounts {
        graph
            .accounts
            .entry(key.clone())
            .or_insert_with(|| Account::stub(key));
    }
}
