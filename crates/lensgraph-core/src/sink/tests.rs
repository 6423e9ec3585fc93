use super::*;
use crate::merge::merge;
use crate::snapshot::Snapshot;
use crate::types::{Account, Engagement, EngagementKind, Follow, Post};
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

fn sample_graph() -> Graph {
    let mut s = Snapshot::new(Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap());
    s.accounts.push(Account::new("0xa"));
    s.accounts.push(Account::new("0xb"));
    s.posts.push(Post::new("p1", "0xa"));
    s.follows.push(Follow::new("0xb", "0xa"));
    s.engagements.push(Engagement {
        actor: "0xb".into(),
        target: "p1".into(),
        referencing: "p2".into(),
        kind: EngagementKind::Comment,
        timestamp: None,
    });
    merge(&[s])
}

/// Rejects every follow edge.
struct NoFollows(MemorySink);

impl RecordSink for NoFollows {
    fn name(&self) -> &str {
        "no-follows"
    }

    fn put(&self, entity: EntityType, record: &Record) -> Result<()> {
        if entity == EntityType::Follows {
            return Err(LensGraphError::Sink("follows unsupported".into()));
        }
        self.0.put(entity, record)
    }
}

#[test]
fn test_publish_writes_every_record() {
    let graph = sample_graph();
    let sink = MemorySink::new();
    let report = publish(&graph, &sink);

    // p2 is a stub post created by the merge.
    assert_eq!(report, PublishReport { written: 6, failed: 0 });
    assert_eq!(sink.count(EntityType::Posts), 2);
    assert!(sink.get(EntityType::Follows, "0xb->0xa").is_some());
    assert!(sink.get(EntityType::Engagements, "p2#comment").is_some());
}

#[test]
fn test_publish_is_idempotent() {
    let graph = sample_graph();
    let sink = MemorySink::new();
    publish(&graph, &sink);
    publish(&graph, &sink);
    assert_eq!(sink.len(), 6);
}

#[test]
fn test_sink_failures_are_counted_not_propagated() {
    let graph = sample_graph();
    let sink = NoFollows(MemorySink::new());
    let report = publish(&graph, &sink);
    assert_eq!(report.failed, 1);
    assert_eq!(report.written, 5);
    assert_eq!(sink.0.count(EntityType::Engagements), 1);
}

#[test]
fn test_put_rejects_mismatched_entity() {
    let sink = MemorySink::new();
    let record = Record::Account(Account::new("0xa"));
    assert!(sink.put(EntityType::Posts, &record).is_err());
    assert!(sink.is_empty());
}

#[test]
fn test_redb_sink_upserts_on_identity_key() {
    let dir = TempDir::new().unwrap();
    let sink = RedbSink::open(dir.path().join("sink.redb")).unwrap();

    let mut account = Account::new("0xa");
    sink.put(EntityType::Accounts, &Record::Account(account.clone())).unwrap();
    account.follower_count = Some(9);
    sink.put(EntityType::Accounts, &Record::Account(account.clone())).unwrap();

    assert_eq!(sink.count(EntityType::Accounts).unwrap(), 1);
    assert_eq!(
        sink.get(EntityType::Accounts, "0xa").unwrap(),
        Some(Record::Account(account))
    );
    assert_eq!(sink.get(EntityType::Posts, "0xa").unwrap(), None);
}

#[test]
fn test_redb_sink_persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("sink.redb");
    {
        let sink = RedbSink::open(&path).unwrap();
        let report = publish(&sample_graph(), &sink);
        assert_eq!(report.failed, 0);
    }
    let sink = RedbSink::open(&path).unwrap();
    assert_eq!(sink.count(EntityType::Accounts).unwrap(), 2);
    assert_eq!(sink.count(EntityType::Follows).unwrap(), 1);
    assert_eq!(sink.count(EntityType::Engagements).unwrap(), 1);
}
