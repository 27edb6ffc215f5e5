//! Persisted entities (§6): the append-only activity log and the analysis
//! results table the Retention Manager prunes.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::EventKind;
use crate::verdict::RiskLevel;

/// One row of the activity log — every dispatched event, independent of
/// whether it triggered an analysis. `dedup_key` is unique; inserting a
/// duplicate is the expected, swallowed `DedupViolation` case (§7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub path: PathBuf,
    pub kind: EventKind,
    pub risk_level: Option<RiskLevel>,
    pub recommendation_text: Option<String>,
    pub dedup_key: String,
    pub analysis_id: Option<i64>,
}

/// One row of the analysis results table, keyed by the verdict it records.
/// `created_at` is the single, fixed timestamp column the Retention Manager
/// orders and prunes by — the original's dynamic `created_at`/`timestamp`
/// attribute lookup collapses to this one name (§9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRow {
    pub id: Option<i64>,
    pub path: PathBuf,
    pub content_hash_sha256: String,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub verdict_json: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
