use super::*;
use crate::cancel::CancelSignal;
use crate::error::{FetchError, UpstreamError};
use crate::testing::ScriptedSource;
use crate::types::Record;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn accounts(n: usize) -> Vec<Value> {
    (0..n).map(|i| json!({ "address": format!("0x{:04}", i) })).collect()
}

fn fast_config() -> FetchConfig {
    FetchConfig::new().with_policy(FetchPolicy::immediate())
}

fn fetcher(source: ScriptedSource) -> (Fetcher<ScriptedSource>, Arc<ScriptedSource>, Arc<MemoryCheckpointStore>) {
    let source = Arc::new(source);
    let store = Arc::new(MemoryCheckpointStore::new());
    let fetcher = Fetcher::new(source.clone(), store.clone(), fast_config());
    (fetcher, source, store)
}

fn keys(records: &[Record]) -> Vec<String> {
    records.iter().map(Record::identity_key).collect()
}

#[tokio::test]
async fn test_drains_all_pages() {
    let (fetcher, source, store) =
        fetcher(ScriptedSource::new().with_items(QueryShape::Accounts, accounts(120), 50));

    let outcome = fetcher
        .fetch_all(fetcher.request(QueryShape::Accounts), &CancelSignal::new())
        .await
        .unwrap();

    assert!(outcome.exhausted());
    assert_eq!(outcome.records.len(), 120);
    assert_eq!(outcome.items_so_far, 120);
    assert_eq!(outcome.pages, 3);
    assert!(outcome.cursor.is_none());
    assert_eq!(source.calls_for(&QueryShape::Accounts), 3);
    assert!(store.load(&QueryShape::Accounts).unwrap().is_none());
}

#[tokio::test]
async fn test_item_cap_keeps_whole_pages_and_checkpoint() {
    let (fetcher, _source, store) =
        fetcher(ScriptedSource::new().with_items(QueryShape::Accounts, accounts(120), 50));

    let outcome = fetcher
        .fetch_all(
            fetcher.request(QueryShape::Accounts).with_max_items(60),
            &CancelSignal::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.stop, StopReason::ItemCap);
    assert!(!outcome.exhausted());
    // Soft cap: overshoot by at most one page.
    assert_eq!(outcome.records.len(), 100);
    assert!(outcome.cursor.is_some());

    let cp = store.load(&QueryShape::Accounts).unwrap().unwrap();
    assert_eq!(cp.items_so_far, 100);
    assert_eq!(cp.last_page, 2);
    assert_eq!(Some(cp.cursor), outcome.cursor);
}

#[tokio::test]
async fn test_resume_after_failure_yields_same_set() {
    let (fetcher, _source, store) = fetcher(
        ScriptedSource::new()
            .with_items(QueryShape::Accounts, accounts(120), 50)
            .fail_page(
                QueryShape::Accounts,
                2,
                vec![UpstreamError::Fatal("bad gateway payload".into())],
            ),
    );
    let cancel = CancelSignal::new();

    let partial = fetcher
        .fetch_all(fetcher.request(QueryShape::Accounts), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(partial.error, FetchError::Fatal { .. }));
    assert_eq!(partial.records.len(), 100);
    let checkpoint = partial.checkpoint.clone().unwrap();
    assert_eq!(store.load(&QueryShape::Accounts).unwrap(), Some(checkpoint.clone()));

    let resumed = fetcher
        .fetch_all(
            fetcher.request(QueryShape::Accounts).resume_from(Some(checkpoint)),
            &cancel,
        )
        .await
        .unwrap();
    assert!(resumed.exhausted());
    assert_eq!(resumed.records.len(), 20);
    assert_eq!(resumed.items_so_far, 120);

    let mut combined = keys(&partial.records);
    combined.extend(keys(&resumed.records));
    let unique: HashSet<_> = combined.iter().cloned().collect();
    assert_eq!(unique.len(), combined.len());

    let (clean, _, _) =
        fetcher_with_items(accounts(120));
    let uninterrupted = clean
        .fetch_all(clean.request(QueryShape::Accounts), &cancel)
        .await
        .unwrap();
    let expected: HashSet<_> = keys(&uninterrupted.records).into_iter().collect();
    assert_eq!(unique, expected);
}

fn fetcher_with_items(
    items: Vec<Value>,
) -> (Fetcher<ScriptedSource>, Arc<ScriptedSource>, Arc<MemoryCheckpointStore>) {
    fetcher(ScriptedSource::new().with_items(QueryShape::Accounts, items, 50))
}

#[tokio::test]
async fn test_rate_limits_within_budget_are_retried() {
    let (fetcher, source, _store) = fetcher(
        ScriptedSource::new()
            .with_items(QueryShape::Posts, vec![json!({ "id": "p1", "author": "0xa" })], 50)
            .fail_page(
                QueryShape::Posts,
                0,
                vec![UpstreamError::RateLimited { retry_after: None }; 3],
            ),
    );

    let outcome = fetcher
        .fetch_all(fetcher.request(QueryShape::Posts), &CancelSignal::new())
        .await
        .unwrap();
    assert_eq!(outcome.records.len(), 1);
    assert_eq!(source.calls_for(&QueryShape::Posts), 4);
    assert_eq!(fetcher.limiter().issued(), 4);
}

#[tokio::test]
async fn test_exhausted_retries_surface_transient() {
    let (fetcher, source, _store) = fetcher(
        ScriptedSource::new()
            .with_items(QueryShape::Posts, vec![json!({ "id": "p1", "author": "0xa" })], 50)
            .fail_page(
                QueryShape::Posts,
                0,
                vec![UpstreamError::Transient("503".into()); 4],
            ),
    );

    let partial = fetcher
        .fetch_all(fetcher.request(QueryShape::Posts), &CancelSignal::new())
        .await
        .unwrap_err();
    match partial.error {
        FetchError::Transient { attempts, .. } => assert_eq!(attempts, 4),
        other => panic!("expected transient, got {:?}", other),
    }
    assert!(partial.error.is_transient());
    assert!(partial.records.is_empty());
    assert!(partial.checkpoint.is_none());
    assert_eq!(source.calls_for(&QueryShape::Posts), 4);
}

#[tokio::test]
async fn test_fatal_is_not_retried() {
    let (fetcher, source, _store) = fetcher(
        ScriptedSource::new()
            .with_items(QueryShape::Posts, vec![json!({ "id": "p1", "author": "0xa" })], 50)
            .fail_page(QueryShape::Posts, 0, vec![UpstreamError::Fatal("401".into())]),
    );

    let partial = fetcher
        .fetch_all(fetcher.request(QueryShape::Posts), &CancelSignal::new())
        .await
        .unwrap_err();
    assert!(matches!(partial.error, FetchError::Fatal { .. }));
    assert_eq!(source.calls_for(&QueryShape::Posts), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_follow_retry_path() {
    let source = ScriptedSource::new()
        .with_latency(Duration::from_secs(10))
        .with_items(QueryShape::Accounts, accounts(1), 50);
    let policy = FetchPolicy::immediate()
        .with_max_retries(2)
        .with_request_timeout(Duration::from_millis(100));
    let source = Arc::new(source);
    let fetcher = Fetcher::new(
        source.clone(),
        Arc::new(MemoryCheckpointStore::new()),
        FetchConfig::new().with_policy(policy),
    );

    let partial = fetcher
        .fetch_all(fetcher.request(QueryShape::Accounts), &CancelSignal::new())
        .await
        .unwrap_err();
    match &partial.error {
        FetchError::Transient { attempts, reason, .. } => {
            assert_eq!(*attempts, 3);
            assert!(reason.contains("timed out"));
        }
        other => panic!("expected transient, got {:?}", other),
    }
    assert_eq!(source.calls_for(&QueryShape::Accounts), 3);
}

#[tokio::test]
async fn test_cancel_before_start_issues_no_requests() {
    let (fetcher, source, _store) =
        fetcher(ScriptedSource::new().with_items(QueryShape::Accounts, accounts(10), 5));
    let cancel = CancelSignal::new();
    cancel.cancel();

    let outcome = fetcher
        .fetch_all(fetcher.request(QueryShape::Accounts), &cancel)
        .await
        .unwrap();
    assert_eq!(outcome.stop, StopReason::Cancelled);
    assert!(outcome.records.is_empty());
    assert!(source.calls().is_empty());
}

#[tokio::test]
async fn test_invalid_items_are_counted_not_kept() {
    let items = vec![
        json!({ "address": "0x1" }),
        json!({ "handle": "no-address" }),
        json!({ "address": "0x2" }),
    ];
    let (fetcher, _source, _store) = fetcher_with_items(items);

    let outcome = fetcher
        .fetch_all(fetcher.request(QueryShape::Accounts), &CancelSignal::new())
        .await
        .unwrap();
    assert_eq!(outcome.records.len(), 2);
    assert_eq!(outcome.rejected, 1);
    assert_eq!(outcome.items_so_far, 2);
}

#[tokio::test]
async fn test_zero_page_size_is_rejected() {
    let (fetcher, source, _store) = fetcher_with_items(accounts(3));
    let partial = fetcher
        .fetch_all(
            FetchRequest::new(QueryShape::Accounts).with_page_size(0),
            &CancelSignal::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(partial.error, FetchError::InvalidRequest(_)));
    assert!(source.calls().is_empty());
}

#[tokio::test]
async fn test_resume_rejects_foreign_checkpoint() {
    let (fetcher, _source, _store) = fetcher_with_items(accounts(3));
    let foreign = Checkpoint {
        shape: QueryShape::Posts,
        cursor: Cursor::new("posts:1"),
        items_so_far: 50,
        last_page: 1,
        updated_at: chrono::Utc::now(),
    };
    let partial = fetcher
        .fetch_all(
            fetcher.request(QueryShape::Accounts).resume_from(Some(foreign)),
            &CancelSignal::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(partial.error, FetchError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_following_listing_decodes_edges() {
    let shape = QueryShape::Following {
        account: "0xa".into(),
    };
    let items = vec![
        json!({ "following": { "address": "0xb" }, "followedOn": "2024-01-02T00:00:00Z" }),
        json!({ "following": { "address": "0xc" } }),
    ];
    let (fetcher, _source, _store) =
        fetcher(ScriptedSource::new().with_items(shape.clone(), items, 1));

    let outcome = fetcher
        .fetch_all(fetcher.request(shape), &CancelSignal::new())
        .await
        .unwrap();
    assert_eq!(keys(&outcome.records), vec!["0xa->0xb", "0xa->0xc"]);
    assert_eq!(outcome.pages, 2);
}
