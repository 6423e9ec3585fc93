//! Optional downstream stores for merged records.

mod memory;
mod redb_sink;

#[cfg(test)]
mod tests;

pub use memory::MemorySink;
pub use redb_sink::RedbSink;

use crate::error::{LensGraphError, Result};
use crate::merge::Graph;
use crate::types::{EntityType, Record};
use serde::{Deserialize, Serialize};

/// A store that consumes records keyed by [`Record::identity_key`].
///
/// `put` must upsert: writing the same record twice leaves one copy, and a
/// later write replaces an earlier one with the same key.
pub trait RecordSink: Send + Sync {
    fn name(&self) -> &str;

    fn put(&self, entity: EntityType, record: &Record) -> Result<()>;
}

/// Outcome of pushing a graph into a sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReport {
    pub written: usize,
    pub failed: usize,
}

/// Push every node and edge of `graph` into `sink`.
///
/// Individual failures are logged and counted; they never abort the publish.
pub fn publish(graph: &Graph, sink: &dyn RecordSink) -> PublishReport {
    let records = graph
        .accounts
        .values()
        .cloned()
        .map(Record::Account)
        .chain(graph.posts.values().cloned().map(Record::Post))
        .chain(graph.follows.values().cloned().map(Record::Follow))
        .chain(graph.engagements.values().cloned().map(Record::Engagement));

    let mut report = PublishReport::default();
    for record in records {
        match sink.put(record.entity_type(), &record) {
            Ok(()) => report.written += 1,
            Err(e) => {
                log::warn!(
                    "Sink {} rejected {} {}: {}",
                    sink.name(),
                    record.entity_type(),
                    record.identity_key(),
                    e
                );
                report.failed += 1;
            }
        }
    }

    log::info!(
        "Published to {}: {} written, {} failed",
        sink.name(),
        report.written,
        report.failed
    );
    report
}

fn check_entity(entity: EntityType, record: &Record) -> Result<()> {
    if record.entity_type() != entity {
        return Err(LensGraphError::Sink(format!(
            "{} record {} put under {}",
            record.entity_type(),
            record.identity_key(),
            entity
        )));
    }
    Ok(())
}
