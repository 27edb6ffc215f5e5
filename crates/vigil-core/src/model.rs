//! Ephemeral event and state types that flow through the pipeline.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of filesystem change a `RawEvent`/`AnalysisJob` represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Created,
    Modified,
    Deleted,
    Renamed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Modified => "modified",
            EventKind::Deleted => "deleted",
            EventKind::Renamed => "renamed",
        }
    }
}

/// A raw, deduplicated-but-not-yet-hash-filtered filesystem observation,
/// emitted by a Root Watcher and consumed by the Dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub path: PathBuf,
    pub kind: EventKind,
    pub observed_at: DateTime<Utc>,
    pub old_path: Option<PathBuf>,
    /// Content hash carried on `Deleted` events so the dispatcher can
    /// coalesce a deleted+created pair with matching size/hash into a
    /// single `Renamed` event within the coalescing window.
    pub last_known_hash: Option<u64>,
    /// Set by the Root Watcher when the file exceeds `max_file_size_bytes`;
    /// carried through to `AnalysisJob::analysis_skipped_size` (§4.2).
    pub oversized: bool,
}

impl RawEvent {
    pub fn new(path: PathBuf, kind: EventKind, observed_at: DateTime<Utc>) -> Self {
        Self {
            path,
            kind,
            observed_at,
            old_path: None,
            last_known_hash: None,
            oversized: false,
        }
    }

    pub fn with_oversized(mut self, oversized: bool) -> Self {
        self.oversized = oversized;
        self
    }

    pub fn with_hash(mut self, hash: u64) -> Self {
        self.last_known_hash = Some(hash);
        self
    }

    pub fn renamed(old_path: PathBuf, new_path: PathBuf, observed_at: DateTime<Utc>) -> Self {
        Self {
            path: new_path,
            kind: EventKind::Renamed,
            observed_at,
            old_path: Some(old_path),
            last_known_hash: None,
            oversized: false,
        }
    }
}

/// Per-path last-seen state, exclusively owned by the State Cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileState {
    /// Seconds since the epoch, fractional for sub-second resolution.
    pub mtime: f64,
    pub size: u64,
    pub content_hash: Option<u64>,
    pub last_analyzed_at: Option<DateTime<Utc>>,
}

impl FileState {
    pub fn new(mtime: f64, size: u64) -> Self {
        Self {
            mtime,
            size,
            content_hash: None,
            last_analyzed_at: None,
        }
    }

    /// True when neither mtime nor size moved since the last pass.
    pub fn unchanged(&self, mtime: f64, size: u64) -> bool {
        self.mtime >= mtime && self.size == size
    }
}

/// A unit of work queued for the worker pool after dedup/hash filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub path: PathBuf,
    pub kind: EventKind,
    pub observed_at: DateTime<Utc>,
    pub dedup_key: String,
    pub analysis_skipped_size: bool,
}

impl AnalysisJob {
    pub fn from_event(event: &RawEvent) -> Self {
        Self {
            path: event.path.clone(),
            kind: event.kind,
            observed_at: event.observed_at,
            dedup_key: dedup_key(&event.path, event.kind, event.observed_at),
            analysis_skipped_size: event.oversized,
        }
    }
}

/// `hash(path ‖ kind ‖ floor(observed_at, 1s))`, fixed at one-second
/// resolution (§4.4, I2).
pub fn dedup_key(path: &Path, kind: EventKind, observed_at: DateTime<Utc>) -> String {
    let floored_secs = observed_at.timestamp();
    let mut hasher = blake3::Hasher::new();
    hasher.update(path.to_string_lossy().as_bytes());
    hasher.update(b"\0");
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(&floored_secs.to_le_bytes());
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_key_stable_within_same_second() {
        let path = Path::new("/tmp/a");
        let t1 = Utc::now();
        let t2 = t1 + chrono::Duration::milliseconds(200);
        assert_eq!(
            dedup_key(path, EventKind::Modified, t1.with_nanosecond(0).unwrap()),
            dedup_key(path, EventKind::Modified, t2.with_nanosecond(0).unwrap())
        );
    }

    #[test]
    fn dedup_key_differs_by_kind() {
        let path = Path::new("/tmp/a");
        let t = Utc::now();
        assert_ne!(
            dedup_key(path, EventKind::Created, t),
            dedup_key(path, EventKind::Modified, t)
        );
    }

    #[test]
    fn file_state_unchanged_detects_no_diff() {
        let state = FileState::new(100.0, 1024);
        assert!(state.unchanged(100.0, 1024));
        assert!(!state.unchanged(101.0, 1024));
        assert!(!state.unchanged(100.0, 2048));
    }
}
