use crate::error::{LensGraphError, Result};
use crate::fetch::{Cursor, QueryShape};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Durable pagination position for one query shape.
///
/// Written after every successful page, removed once the listing is exhausted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub shape: QueryShape,

    /// Cursor of the next page to request.
    pub cursor: Cursor,

    /// Raw items accepted so far, across resumes.
    pub items_so_far: usize,

    /// Number of the last successfully consumed page. Never decreases.
    pub last_page: u64,

    pub updated_at: DateTime<Utc>,
}

/// Where checkpoints live between runs.
pub trait CheckpointStore: Send + Sync {
    /// Checkpoint for `shape`, if one exists and belongs to that shape.
    fn load(&self, shape: &QueryShape) -> Result<Option<Checkpoint>>;

    /// Persists `checkpoint`. Rejects a checkpoint older than the stored one.
    fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    fn clear(&self, shape: &QueryShape) -> Result<()>;
}

fn ensure_monotonic(stored: Option<&Checkpoint>, next: &Checkpoint) -> Result<()> {
    match stored {
        Some(prev) if prev.last_page > next.last_page => Err(LensGraphError::Checkpoint(format!(
            "checkpoint for {} would move back from page {} to {}",
            next.shape, prev.last_page, next.last_page
        ))),
        _ => Ok(()),
    }
}

/// One JSON file per shape: `<dir>/<checkpoint_id>.checkpoint.json`.
/// Writes go to a temporary file first and are renamed into place.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, shape: &QueryShape) -> PathBuf {
        self.dir
            .join(format!("{}.checkpoint.json", shape.checkpoint_id()))
    }

    fn read(&self, shape: &QueryShape) -> Result<Option<Checkpoint>> {
        let path = self.path_for(shape);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        let checkpoint: Checkpoint = serde_json::from_str(&raw)?;
        Ok(Some(checkpoint))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self, shape: &QueryShape) -> Result<Option<Checkpoint>> {
        match self.read(shape)? {
            Some(cp) if &cp.shape == shape => Ok(Some(cp)),
            Some(cp) => {
                log::warn!(
                    "Ignoring checkpoint at {} recorded for {}, expected {}",
                    self.path_for(shape).display(),
                    cp.shape,
                    shape
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let stored = self.read(&checkpoint.shape).ok().flatten();
        ensure_monotonic(stored.as_ref(), checkpoint)?;

        let path = self.path_for(&checkpoint.shape);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(checkpoint)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn clear(&self, shape: &QueryShape) -> Result<()> {
        let path = self.path_for(shape);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// Process-local checkpoints.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    entries: Mutex<HashMap<QueryShape, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<QueryShape, Checkpoint>>> {
        self.entries
            .lock()
            .map_err(|_| LensGraphError::Checkpoint("checkpoint store lock poisoned".into()))
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self, shape: &QueryShape) -> Result<Option<Checkpoint>> {
        Ok(self.lock()?.get(shape).cloned())
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut entries = self.lock()?;
        ensure_monotonic(entries.get(&checkpoint.shape), checkpoint)?;
        entries.insert(checkpoint.shape.clone(), checkpoint.clone());
        Ok(())
    }

    fn clear(&self, shape: &QueryShape) -> Result<()> {
        self.lock()?.remove(shape);
        Ok(())
    }
}
