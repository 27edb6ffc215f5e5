//! Metrics collection and export (§10.6).
//!
//! Shaped after a `MetricsCollector`: atomics hold a process-local
//! snapshot for `Statistics`/tests, while the same call records into the
//! `metrics` facade so a Prometheus exporter installed by the binary can
//! scrape them. Renamed from a `retrigger_*` series to `vigil_*` and
//! re-keyed on this crate's event and risk vocabulary instead of
//! `EnhancedFileEvent`/`WatcherStats`. Lives in `vigil-core` (rather than
//! `vigil-daemon`, where it started) so the watcher, dispatcher, and
//! retention loop can record into it directly instead of through a
//! back-dependency on the daemon crate.
//! Carried over despite the HTTP/metrics-surface Non-goal (§1): the
//! Non-goal excludes serving these over a network, not collecting them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use metrics::{counter, gauge, histogram};

use crate::model::EventKind;
use crate::verdict::RiskLevel;

/// Process-wide metrics collector held by the Supervisor's worker pool,
/// dispatcher, and retention loop.
pub struct MetricsCollector {
    start_time: Instant,
    events_observed: AtomicU64,
    events_dispatched: AtomicU64,
    events_dropped: AtomicU64,
    analyses_completed: AtomicU64,
    analyses_timed_out: AtomicU64,
    errors_total: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            events_observed: AtomicU64::new(0),
            events_dispatched: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            analyses_completed: AtomicU64::new(0),
            analyses_timed_out: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
        }
    }

    /// A Root Watcher observed a raw filesystem change, before dedup.
    pub fn record_event_observed(&self, kind: EventKind) {
        counter!("vigil_events_observed_total", "kind" => event_kind_label(kind)).increment(1);
        self.events_observed.fetch_add(1, Ordering::Relaxed);
    }

    /// The dispatcher handed an `AnalysisJob` to the worker pool.
    pub fn record_event_dispatched(&self, kind: EventKind) {
        counter!("vigil_events_dispatched_total", "kind" => event_kind_label(kind)).increment(1);
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// A watcher or dispatcher dropped an event (queue saturation, dedup).
    pub fn record_event_dropped(&self) {
        counter!("vigil_events_dropped_total").increment(1);
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// A worker finished content analysis; `elapsed` feeds the duration
    /// histogram and `risk_level` the per-level counter (§4.5, §6).
    pub fn record_analysis(&self, elapsed: std::time::Duration, risk_level: RiskLevel) {
        histogram!("vigil_analysis_duration_seconds").record(elapsed.as_secs_f64());
        counter!("vigil_analysis_risk_level_total", "level" => risk_level.as_str()).increment(1);
        self.analyses_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// A worker hit the per-job analysis timeout (§4.5.3, §7).
    pub fn record_analysis_timeout(&self) {
        counter!("vigil_analysis_timeouts_total").increment(1);
        self.analyses_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        counter!("vigil_errors_total").increment(1);
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Worker pool / ingress queue depth, sampled by the Supervisor's
    /// heartbeat (§4.8).
    pub fn set_queue_depth(&self, depth: usize) {
        gauge!("vigil_queue_depth").set(depth as f64);
    }

    pub fn set_workers(&self, count: usize) {
        gauge!("vigil_workers").set(count as f64);
    }

    /// One retention cycle's results (§4.7). Takes the raw counts rather
    /// than `vigil-storage`'s `CleanupStats` so this crate never depends
    /// on a downstream one.
    pub fn record_retention_cycle(&self, rows_deleted_by_age: u64, rows_deleted_by_rank: u64) {
        counter!("vigil_retention_rows_deleted_by_age_total").increment(rows_deleted_by_age);
        counter!("vigil_retention_rows_deleted_by_rank_total").increment(rows_deleted_by_rank);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            events_observed: self.events_observed.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            analyses_completed: self.analyses_completed.load(Ordering::Relaxed),
            analyses_timed_out: self.analyses_timed_out.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn event_kind_label(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Created => "created",
        EventKind::Modified => "modified",
        EventKind::Deleted => "deleted",
        EventKind::Renamed => "renamed",
    }
}

/// Point-in-time read of the process-local counters, independent of
/// whatever the `metrics` facade's own recorder retains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub uptime_seconds: u64,
    pub events_observed: u64,
    pub events_dispatched: u64,
    pub events_dropped: u64,
    pub analyses_completed: u64,
    pub analyses_timed_out: u64,
    pub errors_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently() {
        let collector = MetricsCollector::new();
        collector.record_event_observed(EventKind::Created);
        collector.record_event_observed(EventKind::Modified);
        collector.record_event_dispatched(EventKind::Created);
        collector.record_event_dropped();
        collector.record_analysis(std::time::Duration::from_millis(5), RiskLevel::Safe);
        collector.record_analysis_timeout();
        collector.record_error();

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.events_observed, 2);
        assert_eq!(snapshot.events_dispatched, 1);
        assert_eq!(snapshot.events_dropped, 1);
        assert_eq!(snapshot.analyses_completed, 1);
        assert_eq!(snapshot.analyses_timed_out, 1);
        assert_eq!(snapshot.errors_total, 1);
    }

    #[test]
    fn retention_cycle_does_not_panic_on_empty_stats() {
        let collector = MetricsCollector::new();
        collector.record_retention_cycle(0, 0);
    }
}
