//! Retention Manager (§4.7), grounded in `auto_cleanup.py`'s
//! `LogCleanupManager`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use vigil_core::{CancellationToken, MetricsCollector, RetentionPolicy, VigilError, VigilResult};

use crate::store::Store;

/// Emergency parameters, invoked automatically at 10x `max_records` or by
/// an operator action (§4.7).
pub const EMERGENCY_POLICY: RetentionPolicy = RetentionPolicy::EMERGENCY;

/// Bound on one retention transaction (cutoff delete, rank trim, vacuum),
/// per spec.md's "retention transaction 30 s" timeout.
const RETENTION_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of one cleanup cycle, surfaced to metrics/logging.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupStats {
    pub rows_deleted_by_age: u64,
    pub rows_deleted_by_rank: u64,
}

pub struct RetentionManager {
    store: Store,
    metrics: Option<Arc<MetricsCollector>>,
}

impl RetentionManager {
    pub fn new(store: Store) -> Self {
        Self { store, metrics: None }
    }

    /// Attaches the process-wide metrics collector, owned by the
    /// Supervisor (§10.6).
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// One transactional cycle: age cutoff first, then count-based surplus
    /// trim keeping the newest rows, then a vacuum-equivalent reclaim.
    /// `cycle_start` bounds the age cutoff so rows inserted during the
    /// cycle itself are never eligible for the age-based delete. Bounded
    /// by `RETENTION_TRANSACTION_TIMEOUT` so a stuck transaction can't
    /// block the retention loop's cooperative-cancellation check forever.
    pub async fn run_cycle(
        &self,
        policy: &RetentionPolicy,
        cycle_start: DateTime<Utc>,
    ) -> VigilResult<CleanupStats> {
        let stats = tokio::time::timeout(
            RETENTION_TRANSACTION_TIMEOUT,
            self.run_cycle_inner(policy, cycle_start),
        )
        .await
        .map_err(|_| VigilError::PersistenceIO("retention cycle exceeded 30s transaction timeout".into()))??;

        if let Some(metrics) = &self.metrics {
            metrics.record_retention_cycle(stats.rows_deleted_by_age, stats.rows_deleted_by_rank);
        }
        Ok(stats)
    }

    async fn run_cycle_inner(
        &self,
        policy: &RetentionPolicy,
        cycle_start: DateTime<Utc>,
    ) -> VigilResult<CleanupStats> {
        let cutoff = cycle_start - ChronoDuration::days(policy.days_to_keep);
        let by_age = self.store.delete_older_than(cutoff).await?;

        let mut by_rank = 0u64;
        if policy.max_records > 0 {
            let log_count = self.store.count_logs().await?;
            let analysis_count = self.store.count_analyses().await?;
            if log_count > policy.max_records as u64 || analysis_count > policy.max_records as u64
            {
                by_rank = self.store.delete_beyond_rank(policy.max_records as u64).await?;
            }
        }

        if by_age > 0 || by_rank > 0 {
            self.store.vacuum().await?;
        }

        Ok(CleanupStats {
            rows_deleted_by_age: by_age,
            rows_deleted_by_rank: by_rank,
        })
    }

    /// Same logic as `run_cycle`, parameterized with the emergency policy.
    pub async fn emergency_cleanup(&self, cycle_start: DateTime<Utc>) -> VigilResult<CleanupStats> {
        self.run_cycle(&EMERGENCY_POLICY, cycle_start).await
    }

    /// True once either table exceeds 10x `max_records`, the automatic
    /// emergency-cleanup trigger condition (§4.7).
    pub async fn needs_emergency_cleanup(&self, policy: &RetentionPolicy) -> VigilResult<bool> {
        if policy.max_records <= 0 {
            return Ok(false);
        }
        let threshold = policy.max_records as u64 * 10;
        let log_count = self.store.count_logs().await?;
        let analysis_count = self.store.count_analyses().await?;
        Ok(log_count > threshold || analysis_count > threshold)
    }

    /// Runs `run_cycle` on `policy.cleanup_interval`, honoring
    /// `cancel` for cooperative shutdown within the Supervisor's 5 s
    /// deadline (§5).
    pub async fn run_loop(&self, policy: RetentionPolicy, cancel: CancellationToken) {
        if !policy.auto_enabled {
            return;
        }
        let mut interval = tokio::time::interval(policy.cleanup_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("retention loop stopping");
                    return;
                }
                _ = interval.tick() => {
                    let cycle_start = Utc::now();
                    if self.needs_emergency_cleanup(&policy).await.unwrap_or(false) {
                        tracing::warn!("record count exceeded 10x max_records, running emergency cleanup");
                        if let Err(err) = self.emergency_cleanup(cycle_start).await {
                            tracing::error!(error = %err, "emergency cleanup failed");
                        }
                        continue;
                    }
                    match self.run_cycle(&policy, cycle_start).await {
                        Ok(stats) => tracing::info!(
                            rows_deleted_by_age = stats.rows_deleted_by_age,
                            rows_deleted_by_rank = stats.rows_deleted_by_rank,
                            "retention cycle complete"
                        ),
                        Err(err) => tracing::error!(error = %err, "retention cycle failed"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::{AnalysisRow, EventKind, LogEntry, RiskLevel};

    fn entry(dedup: &str, age_days: i64) -> LogEntry {
        LogEntry {
            id: None,
            timestamp: Utc::now() - ChronoDuration::days(age_days),
            path: "/tmp/a".into(),
            kind: EventKind::Modified,
            risk_level: Some(RiskLevel::Safe),
            recommendation_text: None,
            dedup_key: dedup.to_string(),
            analysis_id: None,
        }
    }

    fn analysis(age_days: i64) -> AnalysisRow {
        AnalysisRow {
            id: None,
            path: "/tmp/a".into(),
            content_hash_sha256: "deadbeef".to_string(),
            risk_score: 1.0,
            risk_level: RiskLevel::Safe,
            verdict_json: serde_json::json!({}),
            created_at: Utc::now() - ChronoDuration::days(age_days),
        }
    }

    #[tokio::test]
    async fn cycle_deletes_rows_older_than_retention_window() {
        let store = Store::open_in_memory().await.unwrap();
        store.insert_log(entry("old", 10)).await.unwrap();
        store.insert_log(entry("new", 0)).await.unwrap();
        store.upsert_analysis(analysis(10)).await.unwrap();

        let manager = RetentionManager::new(store.clone());
        let policy = RetentionPolicy {
            max_records: 1000,
            days_to_keep: 3,
            ..RetentionPolicy::default()
        };
        let stats = manager.run_cycle(&policy, Utc::now()).await.unwrap();
        assert!(stats.rows_deleted_by_age >= 2);
        assert_eq!(store.count_logs().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cycle_trims_surplus_keeping_newest() {
        let store = Store::open_in_memory().await.unwrap();
        for i in 0..10 {
            let mut e = entry(&format!("k{i}"), 0);
            e.timestamp = Utc::now() + ChronoDuration::seconds(i);
            store.insert_log(e).await.unwrap();
        }
        let manager = RetentionManager::new(store.clone());
        let policy = RetentionPolicy {
            max_records: 5,
            days_to_keep: 30,
            ..RetentionPolicy::default()
        };
        manager.run_cycle(&policy, Utc::now()).await.unwrap();
        assert_eq!(store.count_logs().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn emergency_cleanup_uses_tighter_parameters() {
        assert_eq!(EMERGENCY_POLICY.max_records, 500);
        assert_eq!(EMERGENCY_POLICY.days_to_keep, 1);
    }
}
