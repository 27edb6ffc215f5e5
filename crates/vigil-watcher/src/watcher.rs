//! Root Watcher (§4.2): one polling tree-walk task per configured root.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tokio::sync::mpsc;
use vigil_core::{CancellationToken, EventKind, FileState, MetricsCollector, MonitorConfig, RawEvent};

use crate::state_cache::StateCache;

/// Out-of-band control sent by the Supervisor to a running `RootWatcher`
/// task, distinct from the event/job queues (§4.8, §5).
#[derive(Debug, Clone)]
pub enum WatcherCommand {
    /// `RunFullScan`: reload the cache from the on-disk snapshot (if any)
    /// and run an immediate pass, which then emits events for anything
    /// that diverges from that snapshot (§4.8).
    FullRescan,
}

/// Platform-standard scratch-file patterns excluded from watching
/// regardless of config (§4.2).
fn scratch_file_globset() -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in ["~$*", "*.tmp", "*.temp", ".*"] {
        builder.add(Glob::new(pattern).expect("scratch pattern must compile"));
    }
    builder.build().expect("scratch globset must build")
}

/// One root's periodic tree walk. Holds its own `StateCache` and a handle
/// to the shared ingress channel toward the Dispatcher.
pub struct RootWatcher {
    root: PathBuf,
    config: Arc<MonitorConfig>,
    cache: Arc<StateCache>,
    scratch_patterns: GlobSet,
    sender: mpsc::Sender<RawEvent>,
    /// False until the first pass completes; the first pass only seeds
    /// the cache and emits nothing (§4.2, §4.3 restart semantics).
    initialized: bool,
    /// Shared with the Supervisor's `Status()` health metric (§4.2, §6).
    events_dropped_total: Arc<AtomicU64>,
    /// Where this root's `StateCache` is snapshotted, if state persistence
    /// is configured (§4.3). Loaded on startup, saved on clean shutdown
    /// and on `RunFullScan`.
    snapshot_path: Option<PathBuf>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl RootWatcher {
    pub fn new(
        root: PathBuf,
        config: Arc<MonitorConfig>,
        cache: Arc<StateCache>,
        sender: mpsc::Sender<RawEvent>,
    ) -> Self {
        Self {
            root,
            config,
            cache,
            scratch_patterns: scratch_file_globset(),
            sender,
            initialized: false,
            events_dropped_total: Arc::new(AtomicU64::new(0)),
            snapshot_path: None,
            metrics: None,
        }
    }

    /// Attaches the process-wide metrics collector, owned by the
    /// Supervisor (§10.6).
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Attaches a shared drop counter and a snapshot path, both owned by
    /// the Supervisor's `Pipeline` (§4.3, §4.8). Also points the watcher's
    /// `StateCache` at a sibling spill file, so entries evicted under
    /// capacity pressure survive on disk instead of being dropped.
    pub fn with_persistence(
        mut self,
        events_dropped_total: Arc<AtomicU64>,
        snapshot_path: PathBuf,
    ) -> Self {
        self.events_dropped_total = events_dropped_total;
        self.cache.set_spill_path(spill_path_for(&snapshot_path));
        self.snapshot_path = Some(snapshot_path);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Pre-seeds the cache from a previously saved snapshot, if present.
    /// Used on startup so a restart doesn't treat every known file as new
    /// (§4.3). Missing snapshots are not an error.
    pub fn load_snapshot(&self) {
        if let Some(path) = &self.snapshot_path {
            if let Err(err) = self.cache.load_snapshot(path) {
                tracing::warn!(root = %self.root.display(), error = %err, "failed to load state snapshot");
            }
        }
    }

    /// Best-effort snapshot write, called on clean shutdown and at least
    /// once per retention cycle (§4.3).
    pub fn save_snapshot(&self) {
        if let Some(path) = &self.snapshot_path {
            if let Err(err) = self.cache.save_snapshot(path) {
                tracing::warn!(root = %self.root.display(), error = %err, "failed to save state snapshot");
            }
        }
    }

    /// Forces the next pass to behave like an initial pass, per
    /// `RunFullScan` (§4.8): drops the cache and the initialized flag.
    pub fn reset(&mut self) {
        self.cache.clear();
        self.initialized = false;
    }

    /// Implements `RunFullScan` (§4.8): reload the cache from the on-disk
    /// snapshot (so comparisons are against last-known-good state rather
    /// than an empty cache) and run one pass immediately. Created/Deleted
    /// stay suppressed as on any "initial" pass, but Modified still fires
    /// for anything that diverges from the reloaded snapshot, since that
    /// check is not gated on `initialized` (see `visit_file`).
    pub async fn full_rescan(&mut self) {
        self.cache.clear();
        self.initialized = false;
        self.load_snapshot();
        self.run_pass().await;
    }

    /// Runs the polling loop until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken, mut commands: mpsc::Receiver<WatcherCommand>) {
        self.load_snapshot();

        let mut interval = tokio::time::interval(self.config.scan_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut snapshot_interval = tokio::time::interval(self.config.retention.cleanup_interval.max(
            std::time::Duration::from_secs(60),
        ));
        snapshot_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(root = %self.root.display(), "root watcher stopping");
                    self.save_snapshot();
                    return;
                }
                command = commands.recv() => {
                    match command {
                        Some(WatcherCommand::FullRescan) => self.full_rescan().await,
                        None => {}
                    }
                }
                _ = interval.tick() => {
                    self.run_pass().await;
                }
                _ = snapshot_interval.tick() => {
                    self.save_snapshot();
                }
            }
        }
    }

    /// One full tree walk. Public so the Supervisor's `RunFullScan` can
    /// drive an immediate pass outside the regular ticker.
    pub async fn run_pass(&mut self) {
        let mut visited = Vec::new();
        self.walk(self.root.clone(), &mut visited).await;

        if self.initialized {
            self.emit_deletions(&visited);
        }
        self.initialized = true;
    }

    async fn walk(&self, dir: PathBuf, visited: &mut Vec<PathBuf>) {
        if self.config.is_excluded(&dir) {
            return;
        }

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(path = %dir.display(), error = %err, "failed to read directory, skipping subtree");
                return;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(path = %dir.display(), error = %err, "directory iteration error");
                    break;
                }
            };

            let path = entry.path();
            if self.config.is_excluded(&path) {
                continue;
            }
            if self.is_scratch_file(&path) {
                continue;
            }

            let file_type = match entry.file_type().await {
                Ok(ft) => ft,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "failed to stat entry, skipping");
                    continue;
                }
            };

            if file_type.is_dir() {
                if self.config.recursive {
                    Box::pin(self.walk(path, visited)).await;
                }
                continue;
            }

            if !file_type.is_file() {
                continue;
            }
            if self.config.is_excluded_extension(&path) {
                continue;
            }

            self.visit_file(&path, visited).await;
        }
    }

    async fn visit_file(&self, path: &Path, visited: &mut Vec<PathBuf>) {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to stat file, skipping");
                return;
            }
        };

        visited.push(path.to_path_buf());
        let mtime = mtime_secs(&metadata);
        let size = metadata.len();

        match self.cache.get(path) {
            None => {
                self.cache.insert(path.to_path_buf(), FileState::new(mtime, size));
                if self.initialized {
                    self.emit(path, EventKind::Created, size > self.config.effective_max_file_size());
                }
            }
            Some(state) => {
                if !state.unchanged(mtime, size) {
                    self.cache.insert(path.to_path_buf(), FileState::new(mtime, size));
                    self.emit(path, EventKind::Modified, size > self.config.effective_max_file_size());
                }
            }
        }
    }

    fn emit_deletions(&self, visited: &[PathBuf]) {
        let visited: std::collections::HashSet<&PathBuf> = visited.iter().collect();
        for known in self.cache.known_paths() {
            if visited.contains(&known) {
                continue;
            }
            if self.config.is_excluded(&known) {
                self.cache.remove(&known);
                continue;
            }
            let last_hash = self.cache.get(&known).and_then(|s| s.content_hash);
            self.cache.remove(&known);
            let mut event = RawEvent::new(known, EventKind::Deleted, Utc::now());
            if let Some(hash) = last_hash {
                event = event.with_hash(hash);
            }
            self.send(event);
        }
    }

    fn emit(&self, path: &Path, kind: EventKind, oversized: bool) {
        let event = RawEvent::new(path.to_path_buf(), kind, Utc::now()).with_oversized(oversized);
        self.send(event);
    }

    fn send(&self, event: RawEvent) {
        let kind = event.kind;
        if let Err(err) = self.sender.try_send(event) {
            tracing::warn!(error = %err, "dropped event, ingress queue saturated");
            self.events_dropped_total.fetch_add(1, Ordering::Relaxed);
            if let Some(metrics) = &self.metrics {
                metrics.record_event_dropped();
            }
            return;
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_event_observed(kind);
        }
    }

    fn is_scratch_file(&self, path: &Path) -> bool {
        match path.file_name() {
            Some(name) => self.scratch_patterns.is_match(name),
            None => false,
        }
    }
}

/// Derives a spill-file path alongside a root's snapshot file, e.g.
/// `root-<hash>.json` -> `root-<hash>.spill.json`.
fn spill_path_for(snapshot_path: &Path) -> PathBuf {
    let mut name = snapshot_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".spill.json");
    snapshot_path.with_file_name(name)
}

fn mtime_secs(metadata: &std::fs::Metadata) -> f64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use vigil_core::RetentionPolicy;

    fn test_config(root: PathBuf) -> Arc<MonitorConfig> {
        Arc::new(MonitorConfig {
            roots: vec![root],
            recursive: true,
            excludes: Vec::new(),
            excluded_extensions: HashSet::new(),
            max_file_size_bytes: 10 * 1024 * 1024,
            dedup_window: std::time::Duration::from_secs(5),
            scan_interval: std::time::Duration::from_millis(10),
            retention: RetentionPolicy::default(),
        })
    }

    #[tokio::test]
    async fn first_pass_emits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let cache = Arc::new(StateCache::new(crate::state_cache::DEFAULT_CAPACITY));
        let mut watcher = RootWatcher::new(
            dir.path().to_path_buf(),
            test_config(dir.path().to_path_buf()),
            cache,
            tx,
        );
        watcher.run_pass().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn second_pass_detects_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let cache = Arc::new(StateCache::new(crate::state_cache::DEFAULT_CAPACITY));
        let mut watcher = RootWatcher::new(
            dir.path().to_path_buf(),
            test_config(dir.path().to_path_buf()),
            cache,
            tx,
        );
        watcher.run_pass().await;
        std::fs::write(dir.path().join("b.txt"), b"world").unwrap();
        watcher.run_pass().await;

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::Created);
    }

    #[tokio::test]
    async fn deletion_detected_after_revisit() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("c.txt");
        std::fs::write(&file, b"bye").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let cache = Arc::new(StateCache::new(crate::state_cache::DEFAULT_CAPACITY));
        let mut watcher = RootWatcher::new(
            dir.path().to_path_buf(),
            test_config(dir.path().to_path_buf()),
            cache,
            tx,
        );
        watcher.run_pass().await;
        watcher.run_pass().await; // seed a "created" pass (discarded by test)
        let _ = rx.try_recv();

        std::fs::remove_file(&file).unwrap();
        watcher.run_pass().await;

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::Deleted);
    }

    #[tokio::test]
    async fn scratch_files_are_never_emitted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("~$doc.docx"), b"lock").unwrap();
        std::fs::write(dir.path().join("cache.tmp"), b"temp").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let cache = Arc::new(StateCache::new(crate::state_cache::DEFAULT_CAPACITY));
        let mut watcher = RootWatcher::new(
            dir.path().to_path_buf(),
            test_config(dir.path().to_path_buf()),
            cache,
            tx,
        );
        watcher.run_pass().await;
        watcher.run_pass().await;
        assert!(rx.try_recv().is_err());
    }
}
