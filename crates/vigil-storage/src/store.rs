//! `Store`: the persistence facade over `rusqlite` (§4.6).
//!
//! `rusqlite::Connection` is synchronous, so the connection is wrapped in
//! a plain `std::sync::Mutex` and every public method is `async fn` that
//! hands the actual query off to `tokio::task::spawn_blocking`, following
//! the same split used elsewhere in this workspace to keep blocking FFI
//! calls off the async executor.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use vigil_core::{AnalysisRow, EventKind, LogEntry, RiskLevel, VigilError, VigilResult};

use crate::schema::SCHEMA;

/// Optional filters for `QueryLogs` (§4.6).
#[derive(Debug, Clone, Default)]
pub struct LogFilters {
    pub path_prefix: Option<String>,
    pub risk_level: Option<RiskLevel>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

/// `CountByRisk` result (§4.6).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RiskCounts {
    pub safe: u64,
    pub moderate: u64,
    pub suspicious: u64,
    pub dangerous: u64,
    pub total: u64,
}

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens (creating if absent) the SQLite database at `path` and runs
    /// the schema migration idempotently.
    pub async fn open(path: &Path) -> VigilResult<Self> {
        let path = path.to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> VigilResult<Connection> {
            let conn = Connection::open(&path)
                .map_err(|e| VigilError::PersistenceIO(format!("opening {}: {e}", path.display())))?;
            conn.execute_batch(SCHEMA)
                .map_err(|e| VigilError::PersistenceIO(format!("applying schema: {e}")))?;
            Ok(conn)
        })
        .await
        .map_err(|e| VigilError::PersistenceIO(format!("store open task panicked: {e}")))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store, used by tests and by `vigil-daemon`'s `validate`
    /// subcommand to dry-run a config without touching disk.
    pub async fn open_in_memory() -> VigilResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| VigilError::PersistenceIO(format!("opening in-memory db: {e}")))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| VigilError::PersistenceIO(format!("applying schema: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<T, F>(&self, f: F) -> VigilResult<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let guard = self
            .conn
            .lock()
            .map_err(|_| VigilError::PersistenceIO("connection mutex poisoned".into()))?;
        f(&guard).map_err(|e| VigilError::PersistenceIO(e.to_string()))
    }

    /// `InsertLog(entry) → id | fails with DedupViolation`. A unique
    /// constraint violation on `dedup_key` is swallowed per §7: the
    /// existing row's id is returned instead of erroring.
    pub async fn insert_log(&self, entry: LogEntry) -> VigilResult<i64> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            this.with_conn(|conn| {
                let result = conn.execute(
                    "INSERT INTO log_entries
                        (timestamp, path, kind, risk_level, recommendation_text, dedup_key, analysis_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        entry.timestamp.to_rfc3339(),
                        entry.path.to_string_lossy(),
                        entry.kind.as_str(),
                        entry.risk_level.map(|r| r.as_str().to_string()),
                        entry.recommendation_text,
                        entry.dedup_key,
                        entry.analysis_id,
                    ],
                );
                match result {
                    Ok(_) => Ok(conn.last_insert_rowid()),
                    Err(rusqlite::Error::SqliteFailure(e, _))
                        if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        conn.query_row(
                            "SELECT id FROM log_entries WHERE dedup_key = ?1",
                            params![entry.dedup_key],
                            |row| row.get(0),
                        )
                    }
                    Err(e) => Err(e),
                }
            })
        })
        .await
        .map_err(|e| VigilError::PersistenceIO(format!("insert_log task panicked: {e}")))?
    }

    /// `UpsertAnalysis(path, row) → analysis_id`. Always inserts a new
    /// row; "upsert" here means "replace the path's current verdict",
    /// which the newest-wins retention and query ordering already give us
    /// without a real SQL upsert.
    pub async fn upsert_analysis(&self, row: AnalysisRow) -> VigilResult<i64> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            this.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO analysis_rows
                        (path, content_hash_sha256, risk_score, risk_level, verdict_json, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        row.path.to_string_lossy(),
                        row.content_hash_sha256,
                        row.risk_score,
                        row.risk_level.as_str(),
                        row.verdict_json.to_string(),
                        row.created_at.to_rfc3339(),
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
        })
        .await
        .map_err(|e| VigilError::PersistenceIO(format!("upsert_analysis task panicked: {e}")))?
    }

    /// `LinkAnalysis(log_id, analysis_id)`.
    pub async fn link_analysis(&self, log_id: i64, analysis_id: i64) -> VigilResult<()> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            this.with_conn(|conn| {
                conn.execute(
                    "UPDATE log_entries SET analysis_id = ?1 WHERE id = ?2",
                    params![analysis_id, log_id],
                )?;
                Ok(())
            })
        })
        .await
        .map_err(|e| VigilError::PersistenceIO(format!("link_analysis task panicked: {e}")))?
    }

    /// `QueryLogs(filters, page, size) → page of entries ordered by
    /// timestamp desc`.
    pub async fn query_logs(
        &self,
        filters: LogFilters,
        page: u32,
        size: u32,
    ) -> VigilResult<Vec<LogEntry>> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            this.with_conn(|conn| {
                let mut sql = String::from(
                    "SELECT id, timestamp, path, kind, risk_level, recommendation_text, \
                     dedup_key, analysis_id FROM log_entries WHERE 1=1",
                );
                let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

                if let Some(prefix) = &filters.path_prefix {
                    sql += " AND path LIKE ?";
                    bound.push(Box::new(format!("{prefix}%")));
                }
                if let Some(level) = filters.risk_level {
                    sql += " AND risk_level = ?";
                    bound.push(Box::new(level.as_str().to_string()));
                }
                if let Some(since) = filters.since {
                    sql += " AND timestamp >= ?";
                    bound.push(Box::new(since.to_rfc3339()));
                }
                if let Some(until) = filters.until {
                    sql += " AND timestamp <= ?";
                    bound.push(Box::new(until.to_rfc3339()));
                }
                sql += " ORDER BY timestamp DESC LIMIT ? OFFSET ?";
                bound.push(Box::new(size as i64));
                bound.push(Box::new((page as i64) * (size as i64)));

                let mut stmt = conn.prepare(&sql)?;
                let params: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|b| b.as_ref()).collect();
                let rows = stmt.query_map(params.as_slice(), row_to_log_entry)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
        })
        .await
        .map_err(|e| VigilError::PersistenceIO(format!("query_logs task panicked: {e}")))?
    }

    /// `CountByRisk() → {safe, moderate, suspicious, dangerous, total}`.
    pub async fn count_by_risk(&self) -> VigilResult<RiskCounts> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            this.with_conn(|conn| {
                let mut counts = RiskCounts::default();
                let mut stmt =
                    conn.prepare("SELECT risk_level, COUNT(*) FROM log_entries GROUP BY risk_level")?;
                let rows = stmt.query_map([], |row| {
                    let level: Option<String> = row.get(0)?;
                    let count: i64 = row.get(1)?;
                    Ok((level, count as u64))
                })?;
                for row in rows {
                    let (level, count) = row?;
                    match level.as_deref() {
                        Some("safe") => counts.safe = count,
                        Some("moderate") => counts.moderate = count,
                        Some("suspicious") => counts.suspicious = count,
                        Some("dangerous") => counts.dangerous = count,
                        _ => {}
                    }
                    counts.total += count;
                }
                Ok(counts)
            })
        })
        .await
        .map_err(|e| VigilError::PersistenceIO(format!("count_by_risk task panicked: {e}")))?
    }

    /// `DeleteOlderThan(ts)`, applied to both tables inside one
    /// transaction. Returns total rows removed.
    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> VigilResult<u64> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            this.with_conn(|conn| {
                let tx = conn.unchecked_transaction()?;
                let cutoff = cutoff.to_rfc3339();
                let logs = tx.execute("DELETE FROM log_entries WHERE timestamp < ?1", params![cutoff])?;
                let analyses =
                    tx.execute("DELETE FROM analysis_rows WHERE created_at < ?1", params![cutoff])?;
                tx.commit()?;
                Ok((logs + analyses) as u64)
            })
        })
        .await
        .map_err(|e| VigilError::PersistenceIO(format!("delete_older_than task panicked: {e}")))?
    }

    /// `DeleteBeyondRank(n)` — keep the newest `n` rows of each table,
    /// delete the rest, inside one transaction.
    pub async fn delete_beyond_rank(&self, keep: u64) -> VigilResult<u64> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            this.with_conn(|conn| {
                let tx = conn.unchecked_transaction()?;
                let logs = tx.execute(
                    "DELETE FROM log_entries WHERE id NOT IN (
                        SELECT id FROM log_entries ORDER BY timestamp DESC LIMIT ?1
                     )",
                    params![keep as i64],
                )?;
                let analyses = tx.execute(
                    "DELETE FROM analysis_rows WHERE id NOT IN (
                        SELECT id FROM analysis_rows ORDER BY created_at DESC LIMIT ?1
                     )",
                    params![keep as i64],
                )?;
                tx.commit()?;
                Ok((logs + analyses) as u64)
            })
        })
        .await
        .map_err(|e| VigilError::PersistenceIO(format!("delete_beyond_rank task panicked: {e}")))?
    }

    /// Vacuum-equivalent reclamation, callable after large deletes.
    pub async fn vacuum(&self) -> VigilResult<()> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.with_conn(|conn| conn.execute_batch("VACUUM")))
            .await
            .map_err(|e| VigilError::PersistenceIO(format!("vacuum task panicked: {e}")))?
    }

    pub async fn count_logs(&self) -> VigilResult<u64> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            this.with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM log_entries", [], |row| row.get::<_, i64>(0))
                    .map(|n| n as u64)
            })
        })
        .await
        .map_err(|e| VigilError::PersistenceIO(format!("count_logs task panicked: {e}")))?
    }

    pub async fn count_analyses(&self) -> VigilResult<u64> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            this.with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM analysis_rows", [], |row| {
                    row.get::<_, i64>(0)
                })
                .map(|n| n as u64)
            })
        })
        .await
        .map_err(|e| VigilError::PersistenceIO(format!("count_analyses task panicked: {e}")))?
    }
}

fn row_to_log_entry(row: &rusqlite::Row) -> rusqlite::Result<LogEntry> {
    let timestamp: String = row.get(1)?;
    let path: String = row.get(2)?;
    let kind: String = row.get(3)?;
    let risk_level: Option<String> = row.get(4)?;

    Ok(LogEntry {
        id: Some(row.get(0)?),
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .unwrap_or_else(|_| Utc::now().into())
            .with_timezone(&Utc),
        path: path.into(),
        kind: parse_event_kind(&kind),
        risk_level: risk_level.as_deref().and_then(parse_risk_level),
        recommendation_text: row.get(5)?,
        dedup_key: row.get(6)?,
        analysis_id: row.get(7)?,
    })
}

fn parse_event_kind(s: &str) -> EventKind {
    match s {
        "created" => EventKind::Created,
        "modified" => EventKind::Modified,
        "deleted" => EventKind::Deleted,
        _ => EventKind::Renamed,
    }
}

fn parse_risk_level(s: &str) -> Option<RiskLevel> {
    match s {
        "safe" => Some(RiskLevel::Safe),
        "moderate" => Some(RiskLevel::Moderate),
        "suspicious" => Some(RiskLevel::Suspicious),
        "dangerous" => Some(RiskLevel::Dangerous),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::dedup_key;

    fn sample_entry(dedup: &str) -> LogEntry {
        LogEntry {
            id: None,
            timestamp: Utc::now(),
            path: "/tmp/a".into(),
            kind: EventKind::Modified,
            risk_level: Some(RiskLevel::Safe),
            recommendation_text: Some("looks fine".to_string()),
            dedup_key: dedup.to_string(),
            analysis_id: None,
        }
    }

    #[tokio::test]
    async fn insert_and_query_roundtrip() {
        let store = Store::open_in_memory().await.unwrap();
        let id = store.insert_log(sample_entry("key-1")).await.unwrap();
        assert!(id > 0);

        let rows = store
            .query_logs(LogFilters::default(), 0, 10)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].dedup_key, "key-1");
    }

    #[tokio::test]
    async fn duplicate_dedup_key_is_swallowed() {
        let store = Store::open_in_memory().await.unwrap();
        let first = store.insert_log(sample_entry("dup")).await.unwrap();
        let second = store.insert_log(sample_entry("dup")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.count_logs().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn count_by_risk_buckets_correctly() {
        let store = Store::open_in_memory().await.unwrap();
        store.insert_log(sample_entry("a")).await.unwrap();
        let mut dangerous = sample_entry("b");
        dangerous.risk_level = Some(RiskLevel::Dangerous);
        store.insert_log(dangerous).await.unwrap();

        let counts = store.count_by_risk().await.unwrap();
        assert_eq!(counts.safe, 1);
        assert_eq!(counts.dangerous, 1);
        assert_eq!(counts.total, 2);
    }

    #[tokio::test]
    async fn delete_beyond_rank_keeps_newest() {
        let store = Store::open_in_memory().await.unwrap();
        for i in 0..5 {
            let mut entry = sample_entry(&format!("k{i}"));
            entry.timestamp = Utc::now() + chrono::Duration::seconds(i);
            store.insert_log(entry).await.unwrap();
        }
        store.delete_beyond_rank(2).await.unwrap();
        assert_eq!(store.count_logs().await.unwrap(), 2);
    }

    #[test]
    fn dedup_key_used_as_unique_constraint_sanity() {
        let key = dedup_key(
            std::path::Path::new("/a"),
            EventKind::Modified,
            Utc::now(),
        );
        assert!(!key.is_empty());
    }
}
