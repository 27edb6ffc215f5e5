//! Shared error taxonomy for the vigil workspace.
//!
//! Every crate returns `VigilResult<T>` from its internal operations; CLI
//! and Supervisor entry points convert to `anyhow::Error` at the boundary.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VigilError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("configuration I/O error: {0}")]
    ConfigIOError(String),

    #[error("path unavailable: {0}")]
    PathUnavailable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("analysis timed out after {0:?}")]
    AnalysisTimeout(std::time::Duration),

    #[error("file too large for analysis: {size} bytes (limit {limit})")]
    AnalysisTooLarge { size: u64, limit: u64 },

    #[error("duplicate log entry for dedup key {0}")]
    DedupViolation(String),

    #[error("persistence I/O error: {0}")]
    PersistenceIO(String),

    #[error("queue saturated, dropped {0} events")]
    QueueSaturated(usize),

    #[error("shutdown did not complete within the deadline")]
    ShutdownTimeout,

    #[error("pipeline is already running")]
    AlreadyRunning,

    #[error("pipeline is not running")]
    NotRunning,

    #[error("failed to start pipeline: {0}")]
    StartFailed(String),
}

pub type VigilResult<T> = Result<T, VigilError>;
