//! Loaded checkpoints, keyed by canonical path.
//!
//! The map only hands out per-path slots; its write lock is held just long
//! enough to insert an empty slot. Loading happens under the slot's own
//! mutex, so a slow load blocks callers of that path and nobody else. Hits
//! read the slot's `OnceLock` without locking.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};

use crate::checkpoint::Checkpoint;
use crate::error::Result;

#[derive(Default)]
struct Slot {
    checkpoint: OnceLock<Arc<Checkpoint>>,
    loading: Mutex<()>,
}

impl Slot {
    fn get(&self) -> Option<Arc<Checkpoint>> {
        self.checkpoint.get().cloned()
    }
}

#[derive(Default)]
pub struct ModelCache {
    slots: RwLock<HashMap<PathBuf, Arc<Slot>>>,
    loads: AtomicUsize,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &Path) -> Arc<Slot> {
        if let Some(slot) = self.slots.read().get(key) {
            return Arc::clone(slot);
        }
        Arc::clone(self.slots.write().entry(key.to_path_buf()).or_default())
    }

    pub fn get_or_load(&self, path: &Path) -> Result<Arc<Checkpoint>> {
        let key = std::fs::canonicalize(path)?;
        let slot = self.slot(&key);
        if let Some(hit) = slot.get() {
            return Ok(hit);
        }

        let _loading = slot.loading.lock();
        if let Some(hit) = slot.get() {
            return Ok(hit);
        }
        // a failed load leaves the slot empty for the next caller to retry
        let checkpoint = Arc::new(Checkpoint::load(&key)?);
        self.loads.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::clone(slot.checkpoint.get_or_init(|| checkpoint)))
    }

    pub fn contains(&self, path: &Path) -> bool {
        std::fs::canonicalize(path)
            .map(|key| {
                self.slots
                    .read()
                    .get(&key)
                    .is_some_and(|slot| slot.checkpoint.get().is_some())
            })
            .unwrap_or(false)
    }

    /// Number of loaded checkpoints. Loads still in flight are not counted.
    pub fn len(&self) -> usize {
        self.slots
            .read()
            .values()
            .filter(|slot| slot.checkpoint.get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checkpoint loads performed since construction (cache hits excluded).
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    /// Drops every entry. Checkpoints still held by callers stay alive.
    pub fn clear(&self) {
        self.slots.write().clear();
    }
}

impl std::fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots.read();
        let paths: Vec<&PathBuf> = slots
            .iter()
            .filter(|(_, slot)| slot.checkpoint.get().is_some())
            .map(|(path, _)| path)
            .collect();
        f.debug_struct("ModelCache")
            .field("paths", &paths)
            .field("loads", &self.load_count())
            .finish()
    }
}
