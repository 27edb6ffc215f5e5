//! The State Cache: per-path last-seen `FileState`, exclusively owned by
//! its root watcher and read by the dispatcher for rename coalescing.
//!
//! Bounded at a configurable capacity (default 10,000 entries/root) with
//! tick-based LRU eviction, shaped after `FileEventProcessor`'s
//! hierarchical `DashMap` cache and its `CacheEntry`/eviction scheme.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use dashmap::DashMap;
use vigil_core::{FileState, VigilError, VigilResult};

pub const DEFAULT_CAPACITY: usize = 10_000;

struct CacheEntry {
    state: FileState,
    last_touched: u64,
}

/// Per-root cache of on-disk state as of the last completed scan pass.
///
/// Entries evicted past `capacity` are not simply dropped: they're spilled
/// to `spill_path` (when configured) and reloaded lazily on the next `get`
/// for that path, per §4.3's "evicted to disk and reloaded lazily".
pub struct StateCache {
    entries: DashMap<PathBuf, CacheEntry>,
    capacity: usize,
    clock: AtomicU64,
    spill_path: RwLock<Option<PathBuf>>,
}

impl StateCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            clock: AtomicU64::new(0),
            spill_path: RwLock::new(None),
        }
    }

    /// Configures where entries evicted under capacity pressure spill to.
    /// Without this, eviction simply drops the entry (acceptable for tests
    /// and small caches, but loses state for a live root watcher).
    pub fn set_spill_path(&self, path: PathBuf) {
        *self.spill_path.write().unwrap() = Some(path);
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Looks the path up in the live cache, falling back to the spill file
    /// on a miss. A spill hit is promoted back into the live cache so it
    /// participates in LRU tracking again.
    pub fn get(&self, path: &Path) -> Option<FileState> {
        let tick = self.tick();
        if let Some(state) = self.entries.get_mut(path).map(|mut entry| {
            entry.last_touched = tick;
            entry.state.clone()
        }) {
            return Some(state);
        }

        let state = self.take_from_spill(path)?;
        self.insert(path.to_path_buf(), state.clone());
        Some(state)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn insert(&self, path: PathBuf, state: FileState) {
        let tick = self.tick();
        self.entries.insert(
            path,
            CacheEntry {
                state,
                last_touched: tick,
            },
        );
        if self.entries.len() > self.capacity {
            self.evict_oldest();
        }
    }

    pub fn remove(&self, path: &Path) -> Option<FileState> {
        self.entries.remove(path).map(|(_, entry)| entry.state)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry. Used by `RunFullScan` to force the next pass to
    /// re-initialize the cache, so it behaves like an initial pass (§4.8).
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// All paths currently cached, a snapshot for the deletion-detection
    /// pass ("not revisited this pass" per §4.3).
    pub fn known_paths(&self) -> Vec<PathBuf> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.last_touched)
            .map(|e| (e.key().clone(), e.value().state.clone()));
        if let Some((path, state)) = oldest {
            self.entries.remove(&path);
            if let Err(err) = self.spill(&path, &state) {
                tracing::warn!(path = %path.display(), error = %err, "failed to spill evicted cache entry, state lost");
            }
        }
    }

    /// Appends an evicted entry to the spill file, if one is configured.
    fn spill(&self, path: &Path, state: &FileState) -> VigilResult<()> {
        let Some(spill_path) = self.spill_path.read().unwrap().clone() else {
            return Ok(());
        };
        let mut map = read_spill_map(&spill_path)?;
        map.insert(path.to_path_buf(), state.clone());
        write_spill_map(&spill_path, &map)
    }

    /// Removes and returns an entry from the spill file, if present there.
    fn take_from_spill(&self, path: &Path) -> Option<FileState> {
        let spill_path = self.spill_path.read().unwrap().clone()?;
        let mut map = read_spill_map(&spill_path).ok()?;
        let state = map.remove(path)?;
        if let Err(err) = write_spill_map(&spill_path, &map) {
            tracing::warn!(path = %spill_path.display(), error = %err, "failed to rewrite spill file after reload");
        }
        Some(state)
    }

    /// Writes a best-effort snapshot of every cached `FileState` to
    /// `path`, so a restart can pre-seed the cache instead of treating
    /// every file as new (§4.3). Format is implementation-defined JSON.
    pub fn save_snapshot(&self, path: &Path) -> VigilResult<()> {
        let map: HashMap<PathBuf, FileState> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().state.clone()))
            .collect();
        let json = serde_json::to_vec_pretty(&map)
            .map_err(|e| VigilError::PersistenceIO(format!("serializing state snapshot: {e}")))?;
        std::fs::write(path, json)
            .map_err(|e| VigilError::PersistenceIO(format!("writing state snapshot: {e}")))
    }

    /// Loads a snapshot previously written by `save_snapshot`, pre-seeding
    /// the cache. Missing file is not an error — the first pass is then
    /// treated as a true initial pass.
    pub fn load_snapshot(&self, path: &Path) -> VigilResult<()> {
        if !path.exists() {
            return Ok(());
        }
        let json = std::fs::read(path)
            .map_err(|e| VigilError::PersistenceIO(format!("reading state snapshot: {e}")))?;
        let map: HashMap<PathBuf, FileState> = serde_json::from_slice(&json)
            .map_err(|e| VigilError::PersistenceIO(format!("deserializing state snapshot: {e}")))?;
        for (path, state) in map {
            self.insert(path, state);
        }
        Ok(())
    }
}

/// Reads the spill file's JSON map, treating a missing file as empty.
fn read_spill_map(path: &Path) -> VigilResult<HashMap<PathBuf, FileState>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let json = std::fs::read(path)
        .map_err(|e| VigilError::PersistenceIO(format!("reading spill file: {e}")))?;
    serde_json::from_slice(&json)
        .map_err(|e| VigilError::PersistenceIO(format!("deserializing spill file: {e}")))
}

fn write_spill_map(path: &Path, map: &HashMap<PathBuf, FileState>) -> VigilResult<()> {
    let json = serde_json::to_vec_pretty(map)
        .map_err(|e| VigilError::PersistenceIO(format!("serializing spill file: {e}")))?;
    std::fs::write(path, json).map_err(|e| VigilError::PersistenceIO(format!("writing spill file: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get_roundtrip() {
        let cache = StateCache::new(DEFAULT_CAPACITY);
        cache.insert(PathBuf::from("/a"), FileState::new(1.0, 10));
        let state = cache.get(Path::new("/a")).unwrap();
        assert_eq!(state.size, 10);
    }

    #[test]
    fn eviction_drops_least_recently_touched_without_spill_path() {
        let cache = StateCache::new(2);
        cache.insert(PathBuf::from("/a"), FileState::new(1.0, 1));
        cache.insert(PathBuf::from("/b"), FileState::new(1.0, 2));
        // touch /a so /b becomes the oldest
        cache.get(Path::new("/a"));
        cache.insert(PathBuf::from("/c"), FileState::new(1.0, 3));
        assert!(cache.contains(Path::new("/a")));
        assert!(cache.contains(Path::new("/c")));
        assert!(!cache.contains(Path::new("/b")));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn evicted_entry_is_spilled_and_reloaded_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let cache = StateCache::new(2);
        cache.set_spill_path(dir.path().join("state.spill.json"));

        cache.insert(PathBuf::from("/a"), FileState::new(1.0, 1));
        cache.insert(PathBuf::from("/b"), FileState::new(1.0, 2));
        cache.get(Path::new("/a")); // touch /a so /b is the oldest
        cache.insert(PathBuf::from("/c"), FileState::new(1.0, 3));

        // /b was evicted from the live map, not merely dropped.
        assert!(!cache.contains(Path::new("/b")));

        // A subsequent get() transparently reloads it from the spill file.
        let state = cache.get(Path::new("/b")).unwrap();
        assert_eq!(state.size, 2);
        assert!(cache.contains(Path::new("/b")));
    }

    #[test]
    fn clear_empties_cache() {
        let cache = StateCache::new(DEFAULT_CAPACITY);
        cache.insert(PathBuf::from("/a"), FileState::new(1.0, 1));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn snapshot_roundtrip_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot_path = dir.path().join("state.json");

        let cache = StateCache::new(DEFAULT_CAPACITY);
        cache.insert(PathBuf::from("/a"), FileState::new(10.0, 100));
        cache.save_snapshot(&snapshot_path).unwrap();

        let restarted = StateCache::new(DEFAULT_CAPACITY);
        restarted.load_snapshot(&snapshot_path).unwrap();
        let state = restarted.get(Path::new("/a")).unwrap();
        assert_eq!(state.size, 100);
    }

    #[test]
    fn missing_snapshot_file_is_not_an_error() {
        let cache = StateCache::new(DEFAULT_CAPACITY);
        assert!(cache.load_snapshot(Path::new("/nonexistent/path.json")).is_ok());
    }
}
