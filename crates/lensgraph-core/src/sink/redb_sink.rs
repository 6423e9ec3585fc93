use crate::error::{LensGraphError, Result};
use crate::sink::{check_entity, RecordSink};
use crate::types::{EntityType, Record};
use redb::{Database, ReadableTableMetadata, TableDefinition};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// One table per entity type: identity key -> record JSON
const ACCOUNTS: TableDefinition<&str, &[u8]> = TableDefinition::new("accounts");
const POSTS: TableDefinition<&str, &[u8]> = TableDefinition::new("posts");
const FOLLOWS: TableDefinition<&str, &[u8]> = TableDefinition::new("follows");
const ENGAGEMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("engagements");

fn table(entity: EntityType) -> TableDefinition<'static, &'static str, &'static [u8]> {
    match entity {
        EntityType::Accounts => ACCOUNTS,
        EntityType::Posts => POSTS,
        EntityType::Follows => FOLLOWS,
        EntityType::Engagements => ENGAGEMENTS,
    }
}

/// Embedded key-value sink backed by redb.
pub struct RedbSink {
    db: Arc<Database>,
    path: PathBuf,
}

impl RedbSink {
    /// Open or create a sink database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(&path)?;

        // Create every table up front so reads never hit a missing table.
        let write_txn = db.begin_write()?;
        {
            for entity in EntityType::ALL {
                let _ = write_txn.open_table(table(entity))?;
            }
        }
        write_txn.commit()?;

        log::debug!("Opened redb sink at {}", path.display());
        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, entity: EntityType, key: &str) -> Result<Option<Record>> {
        let read_txn = self.db.begin_read()?;
        let records = read_txn.open_table(table(entity))?;
        match records.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes.value())?)),
            None => Ok(None),
        }
    }

    pub fn count(&self, entity: EntityType) -> Result<u64> {
        let read_txn = self.db.begin_read()?;
        let records = read_txn.open_table(table(entity))?;
        Ok(records.len()?)
    }
}

impl RecordSink for RedbSink {
    fn name(&self) -> &str {
        "redb"
    }

    fn put(&self, entity: EntityType, record: &Record) -> Result<()> {
        check_entity(entity, record)?;
        let key = record.identity_key();
        if key.is_empty() {
            return Err(LensGraphError::Sink(format!("{} record without identity key", entity)));
        }
        let bytes = serde_json::to_vec(record)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut records = write_txn.open_table(table(entity))?;
            records.insert(key.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}
