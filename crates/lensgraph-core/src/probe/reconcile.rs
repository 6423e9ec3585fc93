use crate::types::{EngagementKind, EngagementTotals, PostKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome of comparing discovered edges with the upstream's own totals.
///
/// Totals are a lower bound, not ground truth: an overcomplete post keeps
/// every discovered edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    Complete,
    /// Fewer edges discovered than reported.
    Incomplete,
    /// More edges discovered than reported.
    Overcomplete,
    /// The post carried no totals to compare against.
    Unverified,
    /// References could not be fetched.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCount {
    pub kind: EngagementKind,
    pub reported: u64,
    pub observed: u64,
    pub status: ReconciliationStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub post: PostKey,
    pub status: ReconciliationStatus,
    pub kinds: Vec<KindCount>,
    /// References were capped before the listing was exhausted.
    pub truncated: bool,
}

/// Compare `observed` edge counts for `post` against its `reported` totals.
/// Only `kinds` are compared; the rest could not have been observed.
pub fn reconcile(
    post: &str,
    reported: Option<&EngagementTotals>,
    observed: &BTreeMap<EngagementKind, u64>,
    kinds: &[EngagementKind],
    truncated: bool,
) -> Reconciliation {
    let Some(totals) = reported else {
        return Reconciliation {
            post: post.to_string(),
            status: ReconciliationStatus::Unverified,
            kinds: Vec::new(),
            truncated,
        };
    };

    let kinds: Vec<KindCount> = EngagementKind::ALL
        .into_iter()
        .filter(|kind| kinds.contains(kind))
        .map(|kind| {
            let reported = totals.get(kind);
            let observed = observed.get(&kind).copied().unwrap_or(0);
            let status = match observed.cmp(&reported) {
                std::cmp::Ordering::Less => ReconciliationStatus::Incomplete,
                std::cmp::Ordering::Equal => ReconciliationStatus::Complete,
                std::cmp::Ordering::Greater => ReconciliationStatus::Overcomplete,
            };
            KindCount {
                kind,
                reported,
                observed,
                status,
            }
        })
        .collect();

    let any = |s| kinds.iter().any(|k| k.status == s);
    let status = if any(ReconciliationStatus::Incomplete) {
        ReconciliationStatus::Incomplete
    } else if any(ReconciliationStatus::Overcomplete) {
        ReconciliationStatus::Overcomplete
    } else {
        ReconciliationStatus::Complete
    };

    Reconciliation {
        post: post.to_string(),
        status,
        kinds,
        truncated,
    }
}

/// Per-status post counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationSummary {
    pub complete: usize,
    pub incomplete: usize,
    pub overcomplete: usize,
    pub unverified: usize,
    pub failed: usize,
}

impl ReconciliationSummary {
    pub fn add(&mut self, status: ReconciliationStatus) {
        match status {
            ReconciliationStatus::Complete => self.complete += 1,
            ReconciliationStatus::Incomplete => self.incomplete += 1,
            ReconciliationStatus::Overcomplete => self.overcomplete += 1,
            ReconciliationStatus::Unverified => self.unverified += 1,
            ReconciliationStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.complete + self.incomplete + self.overcomplete + self.unverified + self.failed
    }
}

impl<'a> FromIterator<&'a Reconciliation> for ReconciliationSummary {
    fn from_iter<I: IntoIterator<Item = &'a Reconciliation>>(iter: I) -> Self {
        let mut summary = Self::default();
        for r in iter {
            summary.add(r.status);
        }
        summary
    }
}
