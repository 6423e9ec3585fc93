use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Undirected adjacency over account keys. Self-loops are ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NeighborIndex {
    neighbors: BTreeMap<String, BTreeSet<String>>,
}

/// The five structural link-prediction features of a node pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PairFeatures {
    pub common_neighbors: usize,
    pub jaccard: f64,
    pub adamic_adar: f64,
    pub resource_allocation: f64,
    pub preferential_attachment: usize,
}

impl NeighborIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_edges<'a, I>(edges: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut index = Self::new();
        for (u, v) in edges {
            index.add_edge(u, v);
        }
        index
    }

    pub fn add_edge(&mut self, u: &str, v: &str) {
        if u == v {
            return;
        }
        self.neighbors
            .entry(u.to_string())
            .or_default()
            .insert(v.to_string());
        self.neighbors
            .entry(v.to_string())
            .or_default()
            .insert(u.to_string());
    }

    /// Register a node without edges.
    pub fn add_node(&mut self, u: &str) {
        self.neighbors.entry(u.to_string()).or_default();
    }

    pub fn neighbors(&self, u: &str) -> Option<&BTreeSet<String>> {
        self.neighbors.get(u)
    }

    pub fn degree(&self, u: &str) -> usize {
        self.neighbors.get(u).map_or(0, BTreeSet::len)
    }

    pub fn contains_edge(&self, u: &str, v: &str) -> bool {
        self.neighbors.get(u).is_some_and(|n| n.contains(v))
    }

    /// Nodes in key order.
    pub fn nodes(&self) -> impl Iterator<Item = &String> {
        self.neighbors.keys()
    }

    pub fn node_count(&self) -> usize {
        self.neighbors.len()
    }

    pub fn edge_count(&self) -> usize {
        self.neighbors.values().map(BTreeSet::len).sum::<usize>() / 2
    }

    /// Structural features of `(u, v)`. Unknown nodes have no neighbors.
    pub fn features(&self, u: &str, v: &str) -> PairFeatures {
        let empty = BTreeSet::new();
        let nu = self.neighbors.get(u).unwrap_or(&empty);
        let nv = self.neighbors.get(v).unwrap_or(&empty);

        let mut common = 0usize;
        let mut adamic_adar = 0.0;
        let mut resource_allocation = 0.0;
        for w in nu.intersection(nv) {
            common += 1;
            let degree = self.degree(w);
            if degree > 1 {
                adamic_adar += 1.0 / (degree as f64).ln();
            }
            if degree > 0 {
                resource_allocation += 1.0 / degree as f64;
            }
        }

        let union = nu.len() + nv.len() - common;
        let jaccard = if union == 0 {
            0.0
        } else {
            common as f64 / union as f64
        };

        PairFeatures {
            common_neighbors: common,
            jaccard,
            adamic_adar,
            resource_allocation,
            preferential_attachment: nu.len() * nv.len(),
        }
    }
}
