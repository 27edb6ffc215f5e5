//! The Supervisor (§4.8, C8): the process-wide singleton that owns the
//! pipeline's lifecycle, plus the worker pool that hosts the Analyzer
//! (§5) and the retention ticker (§4.7).
//!
//! Shaped after the `Daemon` struct and its `start_*` task-spawning
//! methods, generalized from "one fixed set of tasks wired at `new()`" to
//! "an explicit, restartable `RunningPipeline` guarded by one mutex", per
//! the redesign note on global singletons (§9).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vigil_analyzer::{analyze, timeout_verdict, too_large_verdict};
use vigil_core::{
    AnalysisJob, AnalysisRow, CancellationToken, EventKind, LogEntry, MetricsCollector,
    MonitorConfig, RiskLevel, VigilError, VigilResult,
};
use vigil_storage::{RetentionManager, Store};
use vigil_watcher::{spawn_pipeline, Pipeline};

/// Per-job wall-clock budget (§4.5.3, §5).
const ANALYSIS_TIMEOUT: Duration = Duration::from_secs(2);
/// Graceful-stop deadline before cancellation is forced (§4.8, §5).
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);
/// Bound on each worker's private job queue (§5).
const WORKER_QUEUE_CAPACITY: usize = 256;

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().min(8))
        .unwrap_or(4)
}

/// `Status()` snapshot (§4.8, §6).
#[derive(Debug, Clone)]
pub struct SupervisorStats {
    pub running: bool,
    pub roots: Vec<PathBuf>,
    pub queue_depth: usize,
    pub workers: usize,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub events_dropped_total: u64,
}

struct RunningPipeline {
    config: Arc<MonitorConfig>,
    cancel: CancellationToken,
    pipeline: Pipeline,
    worker_handles: Vec<JoinHandle<()>>,
    retention_handle: JoinHandle<()>,
    heartbeat_handle: JoinHandle<()>,
    last_scan_epoch: Arc<AtomicI64>,
    worker_count: usize,
    pidlock: std::fs::File,
}

/// The process-wide pipeline owner. One `Supervisor` is constructed per
/// process; `Start`/`Stop`/`Restart` are serialized by the inner mutex, and
/// cross-process exclusivity is enforced by a best-effort pidfile lock
/// (§4.8).
pub struct Supervisor {
    state_dir: PathBuf,
    store: Store,
    running: Mutex<Option<RunningPipeline>>,
    metrics: Arc<MetricsCollector>,
}

impl Supervisor {
    pub fn new(state_dir: PathBuf, store: Store) -> Self {
        Self {
            state_dir,
            store,
            running: Mutex::new(None),
            metrics: Arc::new(MetricsCollector::new()),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    fn pidfile_path(&self) -> PathBuf {
        self.state_dir.join("vigil.pid")
    }

    /// `Start(config) → ok | AlreadyRunning | StartFailed` (§4.8).
    pub async fn start(&self, config: MonitorConfig) -> VigilResult<()> {
        let mut guard = self.running.lock().await;
        if guard.is_some() {
            return Err(VigilError::AlreadyRunning);
        }

        std::fs::create_dir_all(&self.state_dir)
            .map_err(|e| VigilError::StartFailed(format!("creating state dir: {e}")))?;

        let pidfile = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(self.pidfile_path())
            .map_err(|e| VigilError::StartFailed(format!("opening pidfile: {e}")))?;
        pidfile
            .try_lock_exclusive()
            .map_err(|_| VigilError::StartFailed("another process holds the pidfile lock".into()))?;

        let config = Arc::new(config);
        let cancel = CancellationToken::new();
        let worker_count = default_worker_count();

        let (job_tx, job_rx) = mpsc::channel::<AnalysisJob>(vigil_watcher::DEFAULT_QUEUE_CAPACITY);
        let pipeline = spawn_pipeline(
            config.clone(),
            job_tx,
            cancel.clone(),
            Some(self.state_dir.clone()),
            Some(self.metrics.clone()),
        );

        let (worker_senders, worker_handles) = self.spawn_workers(worker_count, config.clone(), cancel.clone());
        let router_handle = spawn_router(job_rx, worker_senders, cancel.clone());

        let retention = RetentionManager::new(self.store.clone()).with_metrics(self.metrics.clone());
        let retention_policy = config.retention.clone();
        let retention_cancel = cancel.clone();
        let retention_handle = tokio::spawn(async move {
            retention.run_loop(retention_policy, retention_cancel).await;
        });

        let last_scan_epoch = Arc::new(AtomicI64::new(0));
        let heartbeat_handle = spawn_heartbeat(
            config.clone(),
            cancel.clone(),
            last_scan_epoch.clone(),
            self.metrics.clone(),
            worker_count,
        );

        let mut all_worker_handles = worker_handles;
        all_worker_handles.push(router_handle);

        *guard = Some(RunningPipeline {
            config,
            cancel,
            pipeline,
            worker_handles: all_worker_handles,
            retention_handle,
            heartbeat_handle,
            last_scan_epoch,
            worker_count,
            pidlock: pidfile,
        });

        info!("supervisor started pipeline");
        Ok(())
    }

    /// `Stop() → ok | NotRunning`: graceful stop within the 5s deadline,
    /// then forced cancellation (§4.8, §5, §7).
    pub async fn stop(&self) -> VigilResult<()> {
        let mut guard = self.running.lock().await;
        let running = guard.take().ok_or(VigilError::NotRunning)?;
        drop(guard);

        running.cancel.cancel();

        let mut handles = running.worker_handles;
        handles.push(running.retention_handle);
        handles.push(running.heartbeat_handle);
        handles.extend(running.pipeline.watcher_handles);
        handles.push(running.pipeline.dispatcher_handle);

        // Keep abort handles so a timed-out straggler can be force-killed:
        // dropping the `timeout`'s future only detaches the `JoinHandle`s,
        // it doesn't stop the underlying spawned tasks.
        let abort_handles: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        let join_all = futures_join_all(handles);
        match tokio::time::timeout(SHUTDOWN_DEADLINE, join_all).await {
            Ok(_) => info!("pipeline stopped within deadline"),
            Err(_) => {
                warn!("shutdown deadline exceeded, aborting remaining tasks");
                for handle in abort_handles {
                    handle.abort();
                }
            }
        }

        let _ = FileExt::unlock(&running.pidlock);
        let _ = std::fs::remove_file(self.pidfile_path());

        info!("supervisor stopped pipeline");
        Ok(())
    }

    /// `Restart(config)` = `Stop` then `Start` (§4.8).
    pub async fn restart(&self, config: MonitorConfig) -> VigilResult<()> {
        match self.stop().await {
            Ok(()) | Err(VigilError::NotRunning) => {}
            Err(e) => return Err(e),
        }
        self.start(config).await
    }

    /// `RunFullScan()`: resets every root watcher's cache to the last
    /// on-disk snapshot and runs an immediate pass (§4.8).
    pub async fn run_full_scan(&self) -> VigilResult<()> {
        let guard = self.running.lock().await;
        let running = guard.as_ref().ok_or(VigilError::NotRunning)?;
        running.pipeline.run_full_scan().await;
        Ok(())
    }

    /// `Status() → { running, roots[], queue_depth, workers, last_scan_at,
    /// events_dropped_total }` (§4.8, §6).
    pub async fn status(&self) -> SupervisorStats {
        let guard = self.running.lock().await;
        match guard.as_ref() {
            Some(running) => {
                let last_scan_epoch = running.last_scan_epoch.load(Ordering::Relaxed);
                SupervisorStats {
                    running: true,
                    roots: running.config.roots.clone(),
                    queue_depth: running.pipeline.caches.len(),
                    workers: running.worker_count,
                    last_scan_at: if last_scan_epoch > 0 {
                        DateTime::from_timestamp(last_scan_epoch, 0)
                    } else {
                        None
                    },
                    events_dropped_total: running.pipeline.events_dropped_total.load(Ordering::Relaxed),
                }
            }
            None => SupervisorStats {
                running: false,
                roots: Vec::new(),
                queue_depth: 0,
                workers: 0,
                last_scan_at: None,
                events_dropped_total: 0,
            },
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    fn spawn_workers(
        &self,
        count: usize,
        config: Arc<MonitorConfig>,
        cancel: CancellationToken,
    ) -> (Vec<mpsc::Sender<AnalysisJob>>, Vec<JoinHandle<()>>) {
        let mut senders = Vec::with_capacity(count);
        let mut handles = Vec::with_capacity(count);
        for id in 0..count {
            let (tx, rx) = mpsc::channel::<AnalysisJob>(WORKER_QUEUE_CAPACITY);
            senders.push(tx);
            let store = self.store.clone();
            let config = config.clone();
            let cancel = cancel.clone();
            let metrics = self.metrics.clone();
            handles.push(tokio::spawn(worker_loop(id, rx, store, config, cancel, metrics)));
        }
        (senders, handles)
    }
}

/// Awaits every handle, tolerating individual task panics (which surface
/// as `JoinError`s rather than unwinding the supervisor).
async fn futures_join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if let Err(err) = handle.await {
            if err.is_panic() {
                error!(error = %err, "pipeline task panicked");
            }
        }
    }
}

/// Reads jobs off the dispatcher's single output queue and routes each to
/// a worker keyed by path hash, preserving per-path FIFO ordering across
/// the worker pool (§5's keyed-routing allowance).
fn spawn_router(
    mut job_rx: mpsc::Receiver<AnalysisJob>,
    worker_senders: Vec<mpsc::Sender<AnalysisJob>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("router stopping");
                    return;
                }
                job = job_rx.recv() => {
                    match job {
                        Some(job) => {
                            let index = worker_index(&job.path, worker_senders.len());
                            if let Err(err) = worker_senders[index].try_send(job) {
                                warn!(error = %err, "worker queue saturated, dropping analysis job");
                            }
                        }
                        None => return,
                    }
                }
            }
        }
    })
}

fn worker_index(path: &Path, worker_count: usize) -> usize {
    if worker_count <= 1 {
        return 0;
    }
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    (hasher.finish() as usize) % worker_count
}

/// Updates `last_scan_epoch` roughly once per `scan_interval`, approximating
/// "a watcher pass completed" for the `Status()` health surface without
/// threading a completion signal back from every `RootWatcher` task.
fn spawn_heartbeat(
    config: Arc<MonitorConfig>,
    cancel: CancellationToken,
    last_scan_epoch: Arc<AtomicI64>,
    metrics: Arc<MetricsCollector>,
    worker_count: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.scan_interval.max(Duration::from_millis(50)));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = interval.tick() => {
                    last_scan_epoch.store(Utc::now().timestamp(), Ordering::Relaxed);
                    metrics.set_workers(worker_count);
                }
            }
        }
    })
}

/// One worker: analyzes `Created`/`Modified`/`Renamed` jobs, persists
/// `Deleted` jobs without analysis (there is no content left to read), and
/// honors the per-job timeout and size-skip rules of §4.5.3.
async fn worker_loop(
    id: usize,
    mut rx: mpsc::Receiver<AnalysisJob>,
    store: Store,
    config: Arc<MonitorConfig>,
    cancel: CancellationToken,
    metrics: Arc<MetricsCollector>,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(worker = id, "worker stopping");
                return;
            }
            job = rx.recv() => {
                match job {
                    Some(job) => process_job(job, &store, &config, &metrics).await,
                    None => return,
                }
            }
        }
    }
}

async fn process_job(job: AnalysisJob, store: &Store, config: &MonitorConfig, metrics: &MetricsCollector) {
    if job.kind == EventKind::Deleted {
        persist_unanalyzed(job, store).await;
        return;
    }

    let limit = config.effective_max_file_size();
    let metadata = match tokio::fs::metadata(&job.path).await {
        Ok(m) => m,
        Err(err) => {
            debug!(path = %job.path.display(), error = %err, "file vanished before analysis, dropping job");
            return;
        }
    };
    let size = metadata.len();

    let started = std::time::Instant::now();
    let verdict = if job.analysis_skipped_size || size > limit {
        too_large_verdict(&job.path, size, limit)
    } else {
        match tokio::time::timeout(ANALYSIS_TIMEOUT, read_and_analyze(&job.path)).await {
            Ok(Some(verdict)) => verdict,
            Ok(None) => {
                debug!(path = %job.path.display(), "file unreadable during analysis, dropping job");
                return;
            }
            Err(_) => {
                metrics.record_analysis_timeout();
                timeout_verdict(&job.path)
            }
        }
    };
    metrics.record_analysis(started.elapsed(), verdict.risk_level);

    persist_analyzed(job, verdict, store).await;
}

async fn read_and_analyze(path: &Path) -> Option<vigil_core::Verdict> {
    let content = tokio::fs::read(path).await.ok()?;
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || analyze(&path, &content, serde_json::Value::Null))
        .await
        .ok()
}

async fn persist_unanalyzed(job: AnalysisJob, store: &Store) {
    let entry = LogEntry {
        id: None,
        timestamp: job.observed_at,
        path: job.path.clone(),
        kind: job.kind,
        risk_level: None,
        recommendation_text: None,
        dedup_key: job.dedup_key,
        analysis_id: None,
    };
    if let Err(err) = persist_with_retry(|| store.insert_log(entry.clone())).await {
        warn!(path = %job.path.display(), error = %err, "dropped deletion log entry after retry");
    }
}

async fn persist_analyzed(job: AnalysisJob, verdict: vigil_core::Verdict, store: &Store) {
    let row = AnalysisRow {
        id: None,
        path: job.path.clone(),
        content_hash_sha256: verdict.file_info.hash.clone(),
        risk_score: verdict.risk_score,
        risk_level: verdict.risk_level,
        verdict_json: verdict.to_json(),
        created_at: verdict.produced_at,
    };

    let analysis_id = match persist_with_retry(|| store.upsert_analysis(row.clone())).await {
        Ok(id) => Some(id),
        Err(err) => {
            warn!(path = %job.path.display(), error = %err, "dropped analysis row after retry");
            None
        }
    };

    let entry = LogEntry {
        id: None,
        timestamp: job.observed_at,
        path: job.path.clone(),
        kind: job.kind,
        risk_level: Some(verdict.risk_level),
        recommendation_text: Some(verdict.recommendation.clone()),
        dedup_key: job.dedup_key,
        analysis_id,
    };

    let log_id = match persist_with_retry(|| store.insert_log(entry.clone())).await {
        Ok(id) => id,
        Err(err) => {
            warn!(path = %job.path.display(), error = %err, "dropped log entry after retry");
            return;
        }
    };

    if let Some(analysis_id) = analysis_id {
        if let Err(err) = store.link_analysis(log_id, analysis_id).await {
            warn!(path = %job.path.display(), error = %err, "failed to link analysis to log entry");
        }
    }

    if verdict.risk_level >= RiskLevel::Suspicious {
        warn!(
            path = %job.path.display(),
            risk_level = verdict.risk_level.as_str(),
            risk_score = verdict.risk_score,
            "elevated risk file observed"
        );
    }
}

/// `PersistenceIO` policy (§7): one retry with jittered backoff, then drop
/// the job and surface the error to the caller's health-metric logging.
async fn persist_with_retry<F, Fut, T>(f: F) -> VigilResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = VigilResult<T>>,
{
    match f().await {
        Ok(v) => Ok(v),
        Err(first_err) => {
            let jitter_ms = 20 + (jitter_seed() % 80);
            tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
            f().await.map_err(|_| first_err)
        }
    }
}

fn jitter_seed() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use vigil_core::RetentionPolicy;

    fn test_config(root: PathBuf) -> MonitorConfig {
        MonitorConfig {
            roots: vec![root],
            recursive: true,
            excludes: Vec::new(),
            excluded_extensions: HashSet::new(),
            max_file_size_bytes: 10 * 1024 * 1024,
            dedup_window: Duration::from_secs(1),
            scan_interval: Duration::from_millis(20),
            retention: RetentionPolicy {
                auto_enabled: false,
                ..RetentionPolicy::default()
            },
        }
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory().await.unwrap();
        let supervisor = Supervisor::new(dir.path().join("state"), store);

        supervisor.start(test_config(dir.path().to_path_buf())).await.unwrap();
        let second = supervisor.start(test_config(dir.path().to_path_buf())).await;
        assert!(matches!(second, Err(VigilError::AlreadyRunning)));

        supervisor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_without_start_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory().await.unwrap();
        let supervisor = Supervisor::new(dir.path().join("state"), store);
        assert!(matches!(supervisor.stop().await, Err(VigilError::NotRunning)));
    }

    #[tokio::test]
    async fn status_reports_roots_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory().await.unwrap();
        let supervisor = Supervisor::new(dir.path().join("state"), store);
        let root = dir.path().to_path_buf();

        supervisor.start(test_config(root.clone())).await.unwrap();
        let status = supervisor.status().await;
        assert!(status.running);
        assert_eq!(status.roots, vec![root]);

        supervisor.stop().await.unwrap();
        let status = supervisor.status().await;
        assert!(!status.running);
    }

    #[test]
    fn worker_index_is_stable_for_same_path() {
        let path = Path::new("/tmp/a");
        assert_eq!(worker_index(path, 8), worker_index(path, 8));
    }
}
