//! Shared data model, error taxonomy, cancellation fabric, and fast content
//! hashing for the vigil workspace.
//!
//! Every other crate (`vigil-analyzer`, `vigil-watcher`, `vigil-storage`,
//! `vigil-daemon`) depends on this one and none of its types depend back,
//! keeping the entity definitions in a single place.

pub mod cancel;
pub mod config;
pub mod error;
pub mod hash;
pub mod log;
pub mod metrics;
pub mod model;
pub mod verdict;

pub use cancel::CancellationToken;
pub use config::{MonitorConfig, RetentionPolicy};
pub use error::{VigilError, VigilResult};
pub use log::{AnalysisRow, LogEntry};
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use model::{dedup_key, AnalysisJob, EventKind, FileState, RawEvent};
pub use verdict::{FileInfo, Finding, RiskLevel, Severity, Threat, Verdict};
