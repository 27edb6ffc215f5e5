//! SQL DDL for the activity log and analysis results tables (§4.6).
//!
//! Indexes mirror the mandate exactly: `(timestamp desc)`,
//! `(risk_level, timestamp desc)`, `(dedup_key unique)`, `(path)`.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS log_entries (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp           TEXT NOT NULL,
    path                TEXT NOT NULL,
    kind                TEXT NOT NULL,
    risk_level          TEXT,
    recommendation_text TEXT,
    dedup_key           TEXT NOT NULL UNIQUE,
    analysis_id         INTEGER REFERENCES analysis_rows(id)
);

CREATE INDEX IF NOT EXISTS idx_log_entries_timestamp_desc
    ON log_entries (timestamp DESC);

CREATE INDEX IF NOT EXISTS idx_log_entries_risk_level_timestamp_desc
    ON log_entries (risk_level, timestamp DESC);

CREATE INDEX IF NOT EXISTS idx_log_entries_path
    ON log_entries (path);

CREATE TABLE IF NOT EXISTS analysis_rows (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    path                TEXT NOT NULL,
    content_hash_sha256 TEXT NOT NULL,
    risk_score          REAL NOT NULL,
    risk_level          TEXT NOT NULL,
    verdict_json        TEXT NOT NULL,
    created_at          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_analysis_rows_created_at_desc
    ON analysis_rows (created_at DESC);

CREATE INDEX IF NOT EXISTS idx_analysis_rows_path
    ON analysis_rows (path);
"#;
