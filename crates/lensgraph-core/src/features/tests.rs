use super::*;
use crate::merge::{merge, Graph};
use crate::snapshot::Snapshot;
use crate::types::{Engagement, EngagementKind, Follow, Post};
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use std::collections::HashSet;
use tempfile::TempDir;

fn graph_from_follows(pairs: &[(&str, &str)]) -> Graph {
    let mut s = Snapshot::new(Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap());
    for (day, (a, b)) in pairs.iter().enumerate() {
        let mut f = Follow::new(*a, *b);
        f.followed_on = Some(Utc.with_ymd_and_hms(2024, 1, 1 + day as u32 % 28, 0, 0, 0).unwrap());
        s.follows.push(f);
    }
    merge(&[s])
}

fn ring(n: usize) -> Graph {
    let names: Vec<String> = (0..n).map(|i| format!("n{:02}", i)).collect();
    let pairs: Vec<(&str, &str)> = (0..n)
        .map(|i| (names[i].as_str(), names[(i + 1) % n].as_str()))
        .collect();
    graph_from_follows(&pairs)
}

#[test]
fn test_path_graph_features_match_hand_computed() {
    // x - u - w - v
    let index = NeighborIndex::from_edges([("x", "u"), ("u", "w"), ("w", "v")]);
    let f = index.features("u", "v");
    assert_eq!(f.common_neighbors, 1);
    assert!((f.jaccard - 0.5).abs() < 1e-12);
    assert_eq!(f.preferential_attachment, 2);
    assert!((f.adamic_adar - 1.0 / 2f64.ln()).abs() < 1e-12);
    assert!((f.resource_allocation - 0.5).abs() < 1e-12);
}

#[test]
fn test_features_of_isolated_pair_are_zero() {
    let mut index = NeighborIndex::new();
    index.add_node("a");
    index.add_node("b");
    let f = index.features("a", "b");
    assert_eq!(f.common_neighbors, 0);
    assert_eq!(f.jaccard, 0.0);
    assert_eq!(f.adamic_adar, 0.0);
    assert_eq!(f.preferential_attachment, 0);
    // Unknown nodes behave like isolated ones.
    assert_eq!(index.features("a", "zz").jaccard, 0.0);
}

#[test]
fn test_index_is_undirected_without_self_loops() {
    let index = NeighborIndex::from_edges([("a", "b"), ("b", "a"), ("c", "c")]);
    assert!(index.contains_edge("b", "a"));
    assert_eq!(index.edge_count(), 1);
    assert_eq!(index.degree("c"), 0);
}

#[test]
fn test_split_does_not_leak_pairs() {
    let mut pairs = vec![("a", "b"), ("b", "a"), ("c", "d"), ("d", "c")];
    pairs.extend([("a", "c"), ("b", "d"), ("a", "d"), ("e", "a"), ("e", "b"), ("e", "c")]);
    let graph = graph_from_follows(&pairs);
    let config = DatasetConfig::new().with_test_ratio(0.4);

    let dataset = build_link_dataset(&graph, &config).unwrap();

    let unordered = |r: &LinkRow| {
        let mut p = [r.source.clone(), r.target.clone()];
        p.sort();
        p
    };
    let train: HashSet<_> = dataset.train.iter().map(unordered).collect();
    for row in &dataset.test {
        assert!(!train.contains(&unordered(row)), "{:?} leaked", row);
    }
    assert!(dataset.stats.test_positives > 0);
    assert_eq!(
        dataset.stats.train_positives + dataset.stats.test_positives,
        pairs.len()
    );
}

#[test]
fn test_negatives_never_coincide_with_positives() {
    let graph = ring(12);
    let config = DatasetConfig::new().with_negative_ratio(2);
    let dataset = build_link_dataset(&graph, &config).unwrap();

    let positives: HashSet<(String, String)> = graph
        .follows
        .values()
        .flat_map(|f| {
            [
                (f.follower.clone(), f.following.clone()),
                (f.following.clone(), f.follower.clone()),
            ]
        })
        .collect();

    let negatives: Vec<&LinkRow> = dataset
        .train
        .iter()
        .chain(dataset.test.iter())
        .filter(|r| r.label == 0)
        .collect();
    assert_eq!(negatives.len(), 24);
    for row in &negatives {
        assert_ne!(row.source, row.target);
        assert!(!positives.contains(&(row.source.clone(), row.target.clone())));
    }
    let distinct: HashSet<(String, String)> = negatives
        .iter()
        .map(|r| {
            let mut p = [r.source.clone(), r.target.clone()];
            p.sort();
            (p[0].clone(), p[1].clone())
        })
        .collect();
    assert_eq!(distinct.len(), negatives.len());
}

#[test]
fn test_dataset_is_deterministic_for_a_seed() {
    let graph = ring(10);
    let config = DatasetConfig::new().with_seed(7);
    let a = build_link_dataset(&graph, &config).unwrap();
    let b = build_link_dataset(&graph, &config).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_temporal_split_holds_out_latest_pairs() {
    let graph = ring(5);
    let config = DatasetConfig::new()
        .with_split(SplitStrategy::Temporal)
        .with_test_ratio(0.2)
        .with_negative_ratio(0);
    let dataset = build_link_dataset(&graph, &config).unwrap();
    assert_eq!(dataset.test.len(), 1);
    // The ring's last edge was followed last.
    assert_eq!(dataset.test[0].source, "n04");
    assert_eq!(dataset.test[0].target, "n00");
}

#[test]
fn test_saturated_source_reports_shortfall() {
    // Complete graph on three nodes: no non-adjacent target exists.
    let graph = graph_from_follows(&[("a", "b"), ("b", "c"), ("c", "a")]);
    let dataset = build_link_dataset(&graph, &DatasetConfig::new()).unwrap();
    assert_eq!(dataset.stats.negative_shortfall, 3);
    assert!(dataset.train.iter().chain(&dataset.test).all(|r| r.label == 1));
}

#[test]
fn test_engagement_target_projects_onto_authors() {
    let mut s = Snapshot::new(Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap());
    s.posts.push(Post::new("p1", "0xauthor"));
    s.posts.push(Post::new("p2", "0xfan"));
    for (referencing, kind) in [("p2", EngagementKind::Comment), ("tx", EngagementKind::Tip)] {
        s.engagements.push(Engagement {
            actor: "0xfan".into(),
            target: "p1".into(),
            referencing: referencing.into(),
            kind,
            timestamp: None,
        });
    }
    // Self-engagement is not a link.
    s.engagements.push(Engagement {
        actor: "0xauthor".into(),
        target: "p1".into(),
        referencing: "p3".into(),
        kind: EngagementKind::Quote,
        timestamp: None,
    });
    let graph = merge(&[s]);

    let links = positive_links(&graph, LinkTarget::Engagements);
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].source, "0xfan");
    assert_eq!(links[0].target, "0xauthor");
}

#[test]
fn test_write_dataset_emits_csv_with_header() {
    let graph = ring(6);
    let dataset = build_link_dataset(&graph, &DatasetConfig::new()).unwrap();
    let dir = TempDir::new().unwrap();
    write_dataset(&dataset, dir.path()).unwrap();

    let mut reader = csv::Reader::from_path(dir.path().join("train.csv")).unwrap();
    let headers = reader.headers().unwrap().clone();
    assert_eq!(&headers[0], "source");
    assert_eq!(&headers[7], "label");
    let rows: Vec<LinkRow> = reader.deserialize().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), dataset.train.len());
    assert!(dir.path().join("test.csv").exists());
    assert!(dir.path().join("dataset_summary.json").exists());
}

#[test]
fn test_invalid_test_ratio_is_rejected() {
    let graph = ring(4);
    let config = DatasetConfig::new().with_test_ratio(1.0);
    assert!(build_link_dataset(&graph, &config).is_err());
}

proptest! {
    #[test]
    fn prop_features_are_symmetric_and_bounded(
        edges in prop::collection::vec((0u8..8, 0u8..8), 0..30),
        u in 0u8..8,
        v in 0u8..8,
    ) {
        let names: Vec<(String, String)> = edges
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();
        let index = NeighborIndex::from_edges(names.iter().map(|(a, b)| (a.as_str(), b.as_str())));
        let (u, v) = (u.to_string(), v.to_string());

        let f = index.features(&u, &v);
        let g = index.features(&v, &u);
        prop_assert_eq!(f, g);
        prop_assert!((0.0..=1.0).contains(&f.jaccard));
        prop_assert!(f.common_neighbors <= index.degree(&u).min(index.degree(&v)));
        prop_assert!(f.resource_allocation <= f.common_neighbors as f64);
        prop_assert_eq!(f.preferential_attachment, index.degree(&u) * index.degree(&v));
    }
}
