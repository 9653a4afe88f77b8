use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::Result;

use super::snapshot::IndexSnapshot;
use super::IndexStore;
use crate::scanner::normalize_root;

// ---------------------------------------------------------------------------
// SharedIndex: copy-on-write handle readers pin per request
// ---------------------------------------------------------------------------

/// Readers clone the current `Arc` and never hold the lock across an await.
/// Writers build a new snapshot off to the side and swap it in.
#[derive(Debug, Clone)]
pub struct SharedIndex {
    inner: Arc<RwLock<Arc<IndexSnapshot>>>,
}

impl SharedIndex {
    pub fn new(snapshot: IndexSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(snapshot))),
        }
    }

    /// Pin the current snapshot.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Replace the current snapshot. Readers holding the old `Arc` keep it.
    pub fn install(&self, snapshot: IndexSnapshot) {
        let next = Arc::new(snapshot);
        match self.inner.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

// ---------------------------------------------------------------------------
// IndexCache: one SharedIndex per project root, owned by the caller
// ---------------------------------------------------------------------------

pub struct IndexCache {
    store: IndexStore,
    entries: HashMap<PathBuf, SharedIndex>,
}

impl IndexCache {
    pub fn new(store: IndexStore) -> Self {
        Self {
            store,
            entries: HashMap::new(),
        }
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Handle for `root`, loading or building the snapshot on first use.
    pub fn get_or_load(&mut self, root: &Path) -> Result<SharedIndex> {
        let key = normalize_root(root)?;
        if let Some(shared) = self.entries.get(&key) {
            return Ok(shared.clone());
        }
        let snapshot = self.store.load_or_build(&key)?;
        let shared = SharedIndex::new(snapshot);
        self.entries.insert(key, shared.clone());
        Ok(shared)
    }

    /// Bring the cached snapshot for `root` up to date with disk.
    pub fn refresh(&mut self, root: &Path) -> Result<SharedIndex> {
        let shared = self.get_or_load(root)?;
        let current = shared.snapshot();
        let next = self.store.refresh(&current)?;
        if !next.same_content(&current) {
            self.store.save_for(&next);
            shared.install(next);
        }
        Ok(shared)
    }

    pub fn evict(&mut self, root: &Path) -> bool {
        match normalize_root(root) {
            Ok(key) => self.entries.remove(&key).is_some(),
            Err(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
