//! Polling root watchers, the state cache, and the dispatcher (§4.2-§4.4).
//!
//! `vigil-daemon`'s Supervisor owns a `Pipeline`, spawning one task per
//! root plus the dispatcher and wiring them through the channels built
//! here.

mod dispatcher;
mod state_cache;
mod watcher;

pub use dispatcher::{Dispatcher, DEFAULT_QUEUE_CAPACITY};
pub use state_cache::{StateCache, DEFAULT_CAPACITY};
pub use watcher::{RootWatcher, WatcherCommand};

use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use vigil_core::{AnalysisJob, CancellationToken, MetricsCollector, MonitorConfig, RawEvent};

/// Bound on the per-watcher command channel; `RunFullScan` is rare and
/// operator-driven, so a small buffer is enough (§4.8).
const COMMAND_QUEUE_CAPACITY: usize = 4;

/// The wired-up set of tasks a Supervisor starts and stops as one unit.
pub struct Pipeline {
    pub watcher_handles: Vec<JoinHandle<()>>,
    pub dispatcher_handle: JoinHandle<()>,
    pub caches: Vec<(PathBuf, Arc<StateCache>)>,
    /// One command sender per root, in the same order as `caches`, used by
    /// the Supervisor's `RunFullScan` (§4.8).
    pub watcher_commands: Vec<mpsc::Sender<WatcherCommand>>,
    /// Shared health counter: events dropped by either a watcher's ingress
    /// send or the dispatcher's dedup/queue-saturation paths (§4.4, §6).
    pub events_dropped_total: Arc<AtomicU64>,
}

impl Pipeline {
    /// Sends `RunFullScan` to every root watcher. Non-blocking; a watcher
    /// mid-pass picks the command up on its next `select!` iteration.
    pub async fn run_full_scan(&self) {
        for sender in &self.watcher_commands {
            if sender.send(WatcherCommand::FullRescan).await.is_err() {
                tracing::warn!("watcher command channel closed, skipping full rescan for one root");
            }
        }
    }
}

/// Deterministic, filesystem-safe snapshot file name for a root, so
/// restarts can find the same file without a separate path registry.
fn snapshot_file_name(root: &std::path::Path) -> String {
    let hash = vigil_core::hash::hash_bytes(root.to_string_lossy().as_bytes());
    format!("root-{hash:016x}.json")
}

/// Builds one `RootWatcher` per configured root, a shared ingress queue,
/// and the `Dispatcher` consuming it, then spawns all of them. Returns
/// before any pass completes; the first pass of every watcher seeds its
/// cache without emitting events (§4.2).
///
/// `snapshot_dir`, when set, is where each root's `StateCache` snapshot is
/// read on startup and written on shutdown/`RunFullScan` (§4.3).
pub fn spawn_pipeline(
    config: Arc<MonitorConfig>,
    job_sender: mpsc::Sender<AnalysisJob>,
    cancel: CancellationToken,
    snapshot_dir: Option<PathBuf>,
    metrics: Option<Arc<MetricsCollector>>,
) -> Pipeline {
    let (ingress_tx, ingress_rx) = mpsc::channel::<RawEvent>(DEFAULT_QUEUE_CAPACITY);
    let events_dropped_total = Arc::new(AtomicU64::new(0));

    let caches: Vec<(PathBuf, Arc<StateCache>)> = config
        .roots
        .iter()
        .map(|root| (root.clone(), Arc::new(StateCache::new(DEFAULT_CAPACITY))))
        .collect();

    let mut watcher_handles = Vec::with_capacity(caches.len());
    let mut watcher_commands = Vec::with_capacity(caches.len());
    for (root, cache) in &caches {
        let mut watcher =
            RootWatcher::new(root.clone(), config.clone(), cache.clone(), ingress_tx.clone());
        if let Some(dir) = &snapshot_dir {
            watcher = watcher.with_persistence(events_dropped_total.clone(), dir.join(snapshot_file_name(root)));
        }
        if let Some(metrics) = &metrics {
            watcher = watcher.with_metrics(metrics.clone());
        }
        let cancel = cancel.clone();
        let (cmd_tx, cmd_rx) = mpsc::channel::<WatcherCommand>(COMMAND_QUEUE_CAPACITY);
        watcher_handles.push(tokio::spawn(watcher.run(cancel, cmd_rx)));
        watcher_commands.push(cmd_tx);
    }
    drop(ingress_tx);

    let mut dispatcher = Dispatcher::new(
        ingress_rx,
        job_sender,
        caches.clone(),
        config.dedup_window,
        events_dropped_total.clone(),
    );
    if let Some(metrics) = &metrics {
        dispatcher = dispatcher.with_metrics(metrics.clone());
    }
    let dispatcher_handle = tokio::spawn(dispatcher.run(cancel));

    Pipeline {
        watcher_handles,
        dispatcher_handle,
        caches,
        watcher_commands,
        events_dropped_total,
    }
}
