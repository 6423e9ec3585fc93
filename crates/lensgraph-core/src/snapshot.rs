//! Write-once collection snapshots.
//!
//! Every collection run writes one file per entity type named
//! `<entity>_YYYYMMDD_HHMMSS.json`. Files are never rewritten; merging only
//! reads them.

use crate::error::{LensGraphError, Result};
use crate::ingest;
use crate::types::{Account, Engagement, EntityType, Follow, Post, Record};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// How far `write_next` walks forward looking for a free stamp.
const MAX_STAMP_ADVANCE: u32 = 3600;

/// The records of one collection run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Collection stamp, `YYYYMMDD_HHMMSS`.
    pub id: String,
    pub collected_at: DateTime<Utc>,
    pub accounts: Vec<Account>,
    pub posts: Vec<Post>,
    pub follows: Vec<Follow>,
    pub engagements: Vec<Engagement>,
}

impl Snapshot {
    /// Empty snapshot stamped at `collected_at`, truncated to the second.
    pub fn new(collected_at: DateTime<Utc>) -> Self {
        let id = collected_at.format(STAMP_FORMAT).to_string();
        let collected_at = parse_stamp(&id).unwrap_or(collected_at);
        Self {
            id,
            collected_at,
            ..Default::default()
        }
    }

    pub fn push(&mut self, record: Record) {
        match record {
            Record::Account(a) => self.accounts.push(a),
            Record::Post(p) => self.posts.push(p),
            Record::Follow(f) => self.follows.push(f),
            Record::Engagement(e) => self.engagements.push(e),
        }
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = Record>) {
        for record in records {
            self.push(record);
        }
    }

    pub fn count(&self, entity: EntityType) -> usize {
        match entity {
            EntityType::Accounts => self.accounts.len(),
            EntityType::Posts => self.posts.len(),
            EntityType::Follows => self.follows.len(),
            EntityType::Engagements => self.engagements.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        EntityType::ALL.iter().all(|e| self.count(*e) == 0)
    }

    /// Drop repeated records, keeping the first occurrence of each identity
    /// key. Returns how many were dropped.
    pub fn dedup(&mut self) -> usize {
        let before = self.len();
        let mut seen = HashSet::new();
        self.accounts.retain(|a| seen.insert(a.key.clone()));
        seen.clear();
        self.posts.retain(|p| seen.insert(p.key.clone()));
        let mut pairs = HashSet::new();
        self.follows.retain(|f| pairs.insert(f.key()));
        let mut refs = HashSet::new();
        self.engagements.retain(|e| refs.insert(e.key()));
        before - self.len()
    }

    fn len(&self) -> usize {
        EntityType::ALL.iter().map(|e| self.count(*e)).sum()
    }
}

/// A snapshot file found on disk.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SnapshotFile {
    pub stamp: String,
    pub entity: EntityType,
    pub path: PathBuf,
}

/// Snapshots read back from disk.
#[derive(Debug, Default)]
pub struct LoadedSnapshots {
    /// Ordered by stamp, oldest first.
    pub snapshots: Vec<Snapshot>,
    /// Stored records that failed validation and were skipped.
    pub rejected: usize,
}

pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write all four entity files of `snapshot`. Fails without touching
    /// anything if a file for this stamp already exists.
    pub fn write(&self, snapshot: &Snapshot) -> Result<Vec<PathBuf>> {
        let paths: Vec<(EntityType, PathBuf)> = EntityType::ALL
            .into_iter()
            .map(|entity| (entity, self.path_for(entity, &snapshot.id)))
            .collect();

        if let Some((_, existing)) = paths.iter().find(|(_, p)| p.exists()) {
            return Err(LensGraphError::Snapshot(format!(
                "snapshot {} already exists at {}",
                snapshot.id,
                existing.display()
            )));
        }

        for (entity, path) in &paths {
            let body = match entity {
                EntityType::Accounts => to_json(&snapshot.accounts)?,
                EntityType::Posts => to_json(&snapshot.posts)?,
                EntityType::Follows => to_json(&snapshot.follows)?,
                EntityType::Engagements => to_json(&snapshot.engagements)?,
            };
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, body)?;
            std::fs::rename(&tmp, path)?;
        }

        log::info!(
            "Wrote snapshot {} ({} accounts, {} posts, {} follows, {} engagements)",
            snapshot.id,
            snapshot.accounts.len(),
            snapshot.posts.len(),
            snapshot.follows.len(),
            snapshot.engagements.len()
        );
        Ok(paths.into_iter().map(|(_, p)| p).collect())
    }

    /// Write `snapshot` under the first free stamp at or after its own,
    /// one second at a time. The snapshot's id and time follow the stamp
    /// actually used.
    pub fn write_next(&self, snapshot: &mut Snapshot) -> Result<Vec<PathBuf>> {
        let requested = snapshot.id.clone();
        for _ in 0..MAX_STAMP_ADVANCE {
            if !self.stamp_taken(&snapshot.id) {
                if snapshot.id != requested {
                    log::info!("Snapshot {} already taken, using {}", requested, snapshot.id);
                }
                return self.write(snapshot);
            }
            let next = snapshot.collected_at + chrono::Duration::seconds(1);
            snapshot.id = next.format(STAMP_FORMAT).to_string();
            snapshot.collected_at = next;
        }
        Err(LensGraphError::Snapshot(format!(
            "no free snapshot stamp within {}s of {}",
            MAX_STAMP_ADVANCE, requested
        )))
    }

    fn stamp_taken(&self, stamp: &str) -> bool {
        EntityType::ALL
            .into_iter()
            .any(|entity| self.path_for(entity, stamp).exists())
    }

    /// Snapshot files in the store, ordered by stamp then entity.
    pub fn list(&self) -> Result<Vec<SnapshotFile>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some((entity, stamp)) = parse_file_name(name) {
                files.push(SnapshotFile {
                    stamp,
                    entity,
                    path: path.clone(),
                });
            }
        }
        files.sort();
        Ok(files)
    }

    /// Read every snapshot in the store. Invalid records are skipped and
    /// counted; unreadable files are an error.
    pub fn load_all(&self) -> Result<LoadedSnapshots> {
        let mut by_stamp: BTreeMap<String, Snapshot> = BTreeMap::new();
        let mut rejected = 0;

        for file in self.list()? {
            let Some(collected_at) = parse_stamp(&file.stamp) else {
                continue;
            };
            let snapshot = by_stamp.entry(file.stamp.clone()).or_insert_with(|| Snapshot {
                id: file.stamp.clone(),
                collected_at,
                ..Default::default()
            });

            let raw = std::fs::read_to_string(&file.path)?;
            for value in parse_values(&raw).map_err(|e| {
                LensGraphError::Snapshot(format!("{}: {}", file.path.display(), e))
            })? {
                match ingest::decode_stored(file.entity, &value) {
                    Ok(record) => snapshot.push(record),
                    Err(e) => {
                        rejected += 1;
                        log::warn!("Skipping record in {}: {}", file.path.display(), e);
                    }
                }
            }
        }

        Ok(LoadedSnapshots {
            snapshots: by_stamp.into_values().collect(),
            rejected,
        })
    }

    fn path_for(&self, entity: EntityType, stamp: &str) -> PathBuf {
        self.dir.join(format!("{}_{}.json", entity, stamp))
    }
}

fn to_json<T: Serialize>(records: &[T]) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(records)?)
}

/// Array-of-objects JSON, or one object per line.
fn parse_values(raw: &str) -> std::result::Result<Vec<Value>, serde_json::Error> {
    let trimmed = raw.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed);
    }
    trimmed
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str::<Value>)
        .collect()
}

fn parse_file_name(name: &str) -> Option<(EntityType, String)> {
    let stem = name.strip_suffix(".json")?;
    let (entity, stamp) = stem.split_once('_')?;
    let entity = entity.parse::<EntityType>().ok()?;
    parse_stamp(stamp)?;
    Some((entity, stamp.to_string()))
}

fn parse_stamp(stamp: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}
