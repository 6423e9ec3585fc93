use chrono::{DateTime, TimeZone, Utc};
use lensgraph_core::testing::ScriptedSource;
use lensgraph_core::*;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, d, 8, 0, 0).unwrap()
}

fn accounts(keys: &[&str]) -> Vec<Value> {
    keys.iter().map(|k| json!({ "address": k })).collect()
}

fn following(source: ScriptedSource, follower: &str, targets: &[&str]) -> ScriptedSource {
    let items = targets
        .iter()
        .map(|t| json!({ "following": { "address": t } }))
        .collect();
    source.with_items(
        QueryShape::Following {
            account: follower.to_string(),
        },
        items,
        10,
    )
}

fn collector(
    source: ScriptedSource,
    data: &Path,
    collect: CollectConfig,
) -> Collector<ScriptedSource> {
    let checkpoints = FileCheckpointStore::open(data.join("checkpoints")).unwrap();
    let fetcher = Fetcher::new(
        Arc::new(source),
        Arc::new(checkpoints),
        FetchConfig::new().with_policy(FetchPolicy::immediate()),
    );
    let store = SnapshotStore::open(data.join("snapshots")).unwrap();
    Collector::new(Arc::new(fetcher), store, collect, ProbeConfig::default())
}

// ── Collect → merge → dataset ────────────────────────────────────────────────

#[tokio::test]
async fn test_two_runs_merge_into_one_dataset() {
    init_logging();
    let dir = tempdir().unwrap();
    let cancel = CancelSignal::new();

    let first = ScriptedSource::new()
        .with_items(QueryShape::Accounts, accounts(&["0xa", "0xb", "0xc"]), 2)
        .with_items(
            QueryShape::Posts,
            vec![json!({
                "id": "p1",
                "author": { "address": "0xa" },
                "stats": { "comments": 1, "tips": 1 }
            })],
            10,
        )
        .with_items(
            QueryShape::References {
                post: "p1".to_string(),
            },
            vec![
                json!({ "id": "p2", "author": { "address": "0xb" }, "commentOn": { "id": "p1" } }),
                json!({ "id": "tx1", "author": { "address": "0xd" }, "referenceType": "tip" }),
            ],
            10,
        );
    let first = following(first, "0xa", &["0xb"]);
    let first = following(first, "0xb", &["0xc"]);
    let first = following(first, "0xc", &["0xa"]);

    let report = collector(first, dir.path(), CollectConfig::new())
        .run_at(day(1), &cancel)
        .await;
    assert!(report.is_complete(), "{:?}", report);
    assert_eq!(report.counts.posts, 2);
    assert_eq!(report.counts.engagements, 2);
    assert_eq!(report.reconciliation.complete, 1);
    assert_eq!(report.reconciliation.unverified, 1);

    let second = ScriptedSource::new().with_items(
        QueryShape::Accounts,
        vec![
            json!({ "address": "0xa", "stats": { "followers": 5 } }),
            json!({ "address": "0xd" }),
            json!({ "address": "0xe" }),
        ],
        10,
    );
    let second = following(second, "0xa", &["0xd"]);
    let second = following(second, "0xd", &["0xe"]);
    let second = following(second, "0xe", &["0xb"]);

    let report = collector(second, dir.path(), CollectConfig::new())
        .run_at(day(2), &cancel)
        .await;
    assert_eq!(report.counts.follows, 3);

    let loaded = SnapshotStore::open(dir.path().join("snapshots"))
        .unwrap()
        .load_all()
        .unwrap();
    assert_eq!(loaded.snapshots.len(), 2);
    assert_eq!(loaded.rejected, 0);

    let graph = merge(&loaded.snapshots);
    assert_eq!(graph.accounts.len(), 5);
    assert_eq!(graph.summary.stub_accounts, 0);
    assert_eq!(graph.accounts["0xa"].follower_count, Some(5));
    assert_eq!(graph.posts.len(), 3);
    assert!(graph.posts["tx1"].synthetic);
    assert_eq!(graph.follows.len(), 6);
    assert_eq!(graph.engagements.len(), 2);
    assert_eq!(graph.dangling(), None);

    let graph_dir = dir.path().join("graph");
    write_graph(&graph, &graph_dir).unwrap();
    let graph = load_graph(&graph_dir).unwrap();

    let dataset = build_link_dataset(&graph, &DatasetConfig::new()).unwrap();
    let stats = &dataset.stats;
    assert_eq!(stats.nodes, 5);
    assert_eq!(stats.edges, 6);
    assert_eq!(stats.train_positives + stats.test_positives, 6);
    // Only four unlinked pairs exist among five nodes.
    let negatives = stats.train_negatives + stats.test_negatives;
    assert!(negatives <= 4);
    assert_eq!(negatives + stats.negative_shortfall, 6);
    write_dataset(&dataset, &dir.path().join("dataset")).unwrap();
    assert!(dir.path().join("dataset").join("train.csv").exists());

    let sink = RedbSink::open(dir.path().join("sink.redb")).unwrap();
    let published = publish(&graph, &sink);
    assert_eq!(published, PublishReport { written: 16, failed: 0 });
    assert_eq!(sink.count(EntityType::Posts).unwrap(), 3);
}

// ── Checkpoint resume across runs ────────────────────────────────────────────

fn posts() -> Vec<Value> {
    (1..=4)
        .map(|i| json!({ "id": format!("p{}", i), "author": { "address": "0xa" } }))
        .collect()
}

#[tokio::test]
async fn test_resume_after_fatal_error_completes_listing() {
    init_logging();
    let dir = tempdir().unwrap();
    let cancel = CancelSignal::new();
    let config = CollectConfig::new().with_probe_seed_posts(0);

    let failing = ScriptedSource::new()
        .with_items(QueryShape::Accounts, accounts(&["0xa"]), 10)
        .with_items(QueryShape::Posts, posts(), 2)
        .fail_page(
            QueryShape::Posts,
            1,
            vec![UpstreamError::Fatal("403 forbidden".into())],
        );
    let report = collector(failing, dir.path(), config.clone())
        .run_at(day(1), &cancel)
        .await;
    assert!(report.aborted.is_some());
    assert_eq!(report.counts.posts, 2);

    let healthy = ScriptedSource::new()
        .with_items(QueryShape::Accounts, accounts(&["0xa"]), 10)
        .with_items(QueryShape::Posts, posts(), 2);
    let resumed = collector(healthy, dir.path(), config).with_resume(true);
    let report = resumed.run_at(day(2), &cancel).await;
    assert!(report.is_complete(), "{:?}", report);
    assert_eq!(report.counts.posts, 2);
    assert_eq!(report.exhausted.get("posts"), Some(&true));

    let checkpoints = FileCheckpointStore::open(dir.path().join("checkpoints")).unwrap();
    assert!(checkpoints.load(&QueryShape::Posts).unwrap().is_none());

    let loaded = resumed.store().load_all().unwrap();
    let graph = merge(&loaded.snapshots);
    let keys: Vec<&str> = graph.posts.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["p1", "p2", "p3", "p4"]);
}
