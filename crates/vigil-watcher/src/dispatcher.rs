//! Dispatcher (§4.4): dedup, content-hash filtering, rename coalescing,
//! and handoff to the worker pool's bounded job queue.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use vigil_core::{
    dedup_key, hash::hash_file, AnalysisJob, CancellationToken, EventKind, FileState,
    MetricsCollector, RawEvent,
};

use crate::state_cache::StateCache;

/// Bound on the ingress/job queues (§4.4, §5).
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

struct PendingDelete {
    path: PathBuf,
    observed_at: chrono::DateTime<chrono::Utc>,
    seen_at: Instant,
}

/// Consumes the single ingress queue fed by every Root Watcher and
/// produces `AnalysisJob`s on the queue the worker pool drains.
pub struct Dispatcher {
    receiver: mpsc::Receiver<RawEvent>,
    job_sender: mpsc::Sender<AnalysisJob>,
    caches: Vec<(PathBuf, Arc<StateCache>)>,
    dedup_window: Duration,
    recent_keys: HashMap<String, Instant>,
    /// Keyed by (root index, content hash), awaiting a matching `created`
    /// within the coalescing window to become a single `renamed` event.
    /// Scoped per root so a delete in one root and a same-content create
    /// in another never coalesce into a cross-root "rename" (§4.2, §4.4).
    pending_deletes: HashMap<(usize, u64), PendingDelete>,
    /// Shared with the Supervisor's `Status()` so the health metric stays
    /// readable while the dispatcher task is running, not only after it
    /// exits (§4.4, §6).
    events_dropped_total: Arc<AtomicU64>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Dispatcher {
    pub fn new(
        receiver: mpsc::Receiver<RawEvent>,
        job_sender: mpsc::Sender<AnalysisJob>,
        caches: Vec<(PathBuf, Arc<StateCache>)>,
        dedup_window: Duration,
        events_dropped_total: Arc<AtomicU64>,
    ) -> Self {
        Self {
            receiver,
            job_sender,
            caches,
            dedup_window,
            recent_keys: HashMap::new(),
            pending_deletes: HashMap::new(),
            events_dropped_total,
            metrics: None,
        }
    }

    /// Attaches the process-wide metrics collector, owned by the
    /// Supervisor (§10.6).
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn events_dropped_total(&self) -> u64 {
        self.events_dropped_total.load(Ordering::Relaxed)
    }

    /// Runs until the ingress channel closes or `cancel` fires, flushing
    /// any still-pending coalescing deletes as real `deleted` events on
    /// the way out.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut flush = tokio::time::interval(self.dedup_window.max(Duration::from_millis(50)));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("dispatcher stopping");
                    self.flush_expired_pending_deletes(true).await;
                    return;
                }
                event = self.receiver.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            self.flush_expired_pending_deletes(true).await;
                            return;
                        }
                    }
                }
                _ = flush.tick() => {
                    self.flush_expired_pending_deletes(false).await;
                }
            }
        }
    }

    async fn handle_event(&mut self, event: RawEvent) {
        self.prune_recent_keys();

        let key = dedup_key(&event.path, event.kind, event.observed_at);
        if self.recent_keys.contains_key(&key) {
            self.events_dropped_total.fetch_add(1, Ordering::Relaxed);
            if let Some(metrics) = &self.metrics {
                metrics.record_event_dropped();
            }
            return;
        }
        self.recent_keys.insert(key.clone(), Instant::now());

        match event.kind {
            EventKind::Deleted => self.handle_delete(event, key).await,
            EventKind::Created | EventKind::Modified => self.handle_upsert(event, key).await,
            EventKind::Renamed => self.enqueue(AnalysisJob::from_event(&event)).await,
        }
    }

    async fn handle_delete(&mut self, event: RawEvent, _key: String) {
        if let (Some(hash), Some(root_idx)) = (event.last_known_hash, self.root_index_for(&event.path)) {
            self.pending_deletes.insert(
                (root_idx, hash),
                PendingDelete {
                    path: event.path.clone(),
                    observed_at: event.observed_at,
                    seen_at: Instant::now(),
                },
            );
            return;
        }
        self.enqueue(AnalysisJob::from_event(&event)).await;
    }

    async fn handle_upsert(&mut self, event: RawEvent, _key: String) {
        let hash = match hash_file(&event.path) {
            Ok(hash) => hash,
            Err(err) => {
                tracing::warn!(path = %event.path.display(), error = %err, "failed to hash file, dispatching without hash filter");
                self.enqueue(AnalysisJob::from_event(&event)).await;
                return;
            }
        };

        if event.kind == EventKind::Created {
            if let Some(root_idx) = self.root_index_for(&event.path) {
                if let Some(old_path) = self.pending_deletes.remove(&(root_idx, hash)).map(|p| p.path) {
                    let renamed = RawEvent::renamed(old_path, event.path.clone(), event.observed_at);
                    self.enqueue(AnalysisJob::from_event(&renamed)).await;
                    self.update_cache_hash(&event.path, hash);
                    return;
                }
            }
        }

        if let Some(cache) = self.cache_for(&event.path) {
            if let Some(state) = cache.get(&event.path) {
                if state.content_hash == Some(hash) {
                    // I3: content unchanged, suppress even though mtime/size moved.
                    return;
                }
            }
        }

        self.update_cache_hash(&event.path, hash);
        self.enqueue(AnalysisJob::from_event(&event)).await;
    }

    fn update_cache_hash(&self, path: &Path, hash: u64) {
        if let Some(cache) = self.cache_for(path) {
            let size = cache.get(path).map(|s| s.size).unwrap_or(0);
            let mtime = cache.get(path).map(|s| s.mtime).unwrap_or(0.0);
            let mut state = FileState::new(mtime, size);
            state.content_hash = Some(hash);
            cache.insert(path.to_path_buf(), state);
        }
    }

    fn cache_for(&self, path: &Path) -> Option<&Arc<StateCache>> {
        self.caches
            .iter()
            .find(|(root, _)| path.starts_with(root))
            .map(|(_, cache)| cache)
    }

    /// Index into `caches` of the root containing `path`, used to scope
    /// `pending_deletes` so rename coalescing never crosses roots.
    fn root_index_for(&self, path: &Path) -> Option<usize> {
        self.caches.iter().position(|(root, _)| path.starts_with(root))
    }

    async fn enqueue(&self, job: AnalysisJob) {
        let kind = job.kind;
        if let Err(err) = self.job_sender.try_send(job) {
            tracing::warn!(error = %err, "job queue saturated, dropping analysis job");
            self.events_dropped_total.fetch_add(1, Ordering::Relaxed);
            if let Some(metrics) = &self.metrics {
                metrics.record_event_dropped();
            }
            return;
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_event_dispatched(kind);
        }
    }

    fn prune_recent_keys(&mut self) {
        let window = self.dedup_window;
        self.recent_keys.retain(|_, seen_at| seen_at.elapsed() < window);
    }

    /// Emits any pending coalescing delete older than the window (or all
    /// of them, on shutdown) as a real `deleted` job.
    async fn flush_expired_pending_deletes(&mut self, force_all: bool) {
        let window = self.dedup_window;
        let expired: Vec<(usize, u64)> = self
            .pending_deletes
            .iter()
            .filter(|(_, pending)| force_all || pending.seen_at.elapsed() >= window)
            .map(|(key, _)| *key)
            .collect();

        for key in expired {
            if let Some(pending) = self.pending_deletes.remove(&key) {
                let event = RawEvent::new(pending.path, EventKind::Deleted, pending.observed_at);
                self.enqueue(AnalysisJob::from_event(&event)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Timelike, Utc};

    fn make_dispatcher() -> (
        Dispatcher,
        mpsc::Sender<RawEvent>,
        mpsc::Receiver<AnalysisJob>,
    ) {
        let (tx, rx) = mpsc::channel(16);
        let (job_tx, job_rx) = mpsc::channel(16);
        let dispatcher = Dispatcher::new(
            rx,
            job_tx,
            Vec::new(),
            Duration::from_secs(5),
            Arc::new(AtomicU64::new(0)),
        );
        (dispatcher, tx, job_rx)
    }

    #[tokio::test]
    async fn duplicate_events_in_window_are_deduped() {
        let (mut dispatcher, tx, mut job_rx) = make_dispatcher();
        let now = Utc::now().with_nanosecond(0).unwrap();
        tx.send(RawEvent::new(PathBuf::from("/tmp/nonexistent-a"), EventKind::Deleted, now))
            .await
            .unwrap();
        tx.send(RawEvent::new(PathBuf::from("/tmp/nonexistent-a"), EventKind::Deleted, now))
            .await
            .unwrap();
        drop(tx);

        dispatcher.run(CancellationToken::new()).await;
        let mut count = 0;
        while job_rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn pending_deletes_do_not_coalesce_across_roots() {
        let root_a = tempfile::tempdir().unwrap();
        let root_b = tempfile::tempdir().unwrap();
        let file_a = root_a.path().join("f.txt");
        let file_b = root_b.path().join("g.txt");
        std::fs::write(&file_a, b"identical content").unwrap();
        std::fs::write(&file_b, b"identical content").unwrap();
        let hash = hash_file(&file_a).unwrap();

        let (_tx, rx) = mpsc::channel(16);
        let (job_tx, mut job_rx) = mpsc::channel(16);
        let mut dispatcher = Dispatcher::new(
            rx,
            job_tx,
            vec![
                (root_a.path().to_path_buf(), Arc::new(StateCache::new(16))),
                (root_b.path().to_path_buf(), Arc::new(StateCache::new(16))),
            ],
            Duration::from_secs(5),
            Arc::new(AtomicU64::new(0)),
        );

        let now = Utc::now().with_nanosecond(0).unwrap();
        dispatcher
            .handle_event(RawEvent::new(file_a.clone(), EventKind::Deleted, now).with_hash(hash))
            .await;
        dispatcher
            .handle_event(RawEvent::new(file_b.clone(), EventKind::Created, now))
            .await;

        let job = job_rx.try_recv().expect("the create in root B should dispatch on its own");
        assert_eq!(job.kind, EventKind::Created);
        assert_eq!(job.path, file_b);
        assert!(job_rx.try_recv().is_err(), "no second job should be queued yet");

        dispatcher.flush_expired_pending_deletes(true).await;
        let flushed = job_rx.try_recv().expect("the delete in root A should flush on its own");
        assert_eq!(flushed.kind, EventKind::Deleted);
        assert_eq!(flushed.path, file_a);
    }
}
