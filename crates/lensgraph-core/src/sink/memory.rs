use crate::error::{LensGraphError, Result};
use crate::sink::{check_entity, RecordSink};
use crate::types::{EntityType, Record};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// In-process sink, mostly for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<BTreeMap<(EntityType, String), Record>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity: EntityType, key: &str) -> Option<Record> {
        self.records
            .lock()
            .ok()?
            .get(&(entity, key.to_string()))
            .cloned()
    }

    pub fn count(&self, entity: EntityType) -> usize {
        self.records
            .lock()
            .map(|r| r.keys().filter(|(e, _)| *e == entity).count())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn put(&self, entity: EntityType, record: &Record) -> Result<()> {
        check_entity(entity, record)?;
        let mut records = self
            .records
            .lock()
            .map_err(|_| LensGraphError::Sink("memory sink lock poisoned".into()))?;
        records.insert((entity, record.identity_key()), record.clone());
        Ok(())
    }
}
