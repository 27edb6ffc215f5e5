//! Control API facade (§6, C9).
//!
//! A thin adapter sitting where a `ZeroCopyConsumer`/gRPC surface used
//! to: it exposes the control operations a transport layer
//! would call (`Status`, `Start`, `Stop`, `Restart`, `UpdateDirectories`,
//! `RunScan`, `SetScanInterval`, `QueryLogs`, `Statistics`) as plain
//! in-process methods on [`ControlApi`]. Wiring an HTTP or gRPC listener
//! on top of this is explicitly out of scope (§1); nothing here assumes
//! one exists.

use std::path::PathBuf;
use std::time::Duration;

use vigil_core::{MonitorConfig, VigilResult};
use vigil_storage::{LogFilters, RiskCounts, Store};

use crate::supervisor::{Supervisor, SupervisorStats};

/// Aggregate counters backing the `Statistics` control operation.
#[derive(Debug, Clone)]
pub struct Statistics {
    pub supervisor: SupervisorStats,
    pub risk_counts: RiskCounts,
    pub total_logs: u64,
    pub total_analyses: u64,
}

/// Facade the Supervisor and Store sit behind for whatever transport the
/// deployment wires up (none, in this crate).
pub struct ControlApi<'a> {
    supervisor: &'a Supervisor,
    store: &'a Store,
}

impl<'a> ControlApi<'a> {
    pub fn new(supervisor: &'a Supervisor, store: &'a Store) -> Self {
        Self { supervisor, store }
    }

    pub async fn status(&self) -> SupervisorStats {
        self.supervisor.status().await
    }

    pub async fn start(&self, config: MonitorConfig) -> VigilResult<()> {
        self.supervisor.start(config).await
    }

    pub async fn stop(&self) -> VigilResult<()> {
        self.supervisor.stop().await
    }

    pub async fn restart(&self, config: MonitorConfig) -> VigilResult<()> {
        self.supervisor.restart(config).await
    }

    /// `UpdateDirectories(list)`: replaces the configured roots and
    /// restarts the pipeline against the new `config`, since roots are
    /// only read at `Start()` (§4.1).
    pub async fn update_directories(
        &self,
        mut config: MonitorConfig,
        roots: Vec<PathBuf>,
    ) -> VigilResult<()> {
        config.roots = roots;
        self.supervisor.restart(config).await
    }

    pub async fn run_scan(&self) -> VigilResult<()> {
        self.supervisor.run_full_scan().await
    }

    /// `SetScanInterval(minutes)`: like `UpdateDirectories`, only takes
    /// effect on the next `Start`/`Restart`.
    pub async fn set_scan_interval(
        &self,
        mut config: MonitorConfig,
        minutes: u64,
    ) -> VigilResult<()> {
        config.scan_interval = Duration::from_secs(minutes * 60);
        self.supervisor.restart(config).await
    }

    pub async fn query_logs(
        &self,
        filters: LogFilters,
        page: u32,
        size: u32,
    ) -> VigilResult<Vec<vigil_core::LogEntry>> {
        self.store.query_logs(filters, page, size).await
    }

    pub async fn statistics(&self) -> VigilResult<Statistics> {
        Ok(Statistics {
            supervisor: self.supervisor.status().await,
            risk_counts: self.store.count_by_risk().await?,
            total_logs: self.store.count_logs().await?,
            total_analyses: self.store.count_analyses().await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration as StdDuration;
    use vigil_core::config::RetentionPolicy;

    fn test_config(root: PathBuf) -> MonitorConfig {
        MonitorConfig {
            roots: vec![root],
            recursive: true,
            excludes: Vec::new(),
            excluded_extensions: HashSet::new(),
            max_file_size_bytes: 1024 * 1024,
            dedup_window: StdDuration::from_secs(2),
            scan_interval: StdDuration::from_secs(1),
            retention: RetentionPolicy::default(),
        }
    }

    #[tokio::test]
    async fn status_reflects_start_and_stop() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory().await.unwrap();
        let supervisor = Supervisor::new(dir.path().to_path_buf(), store.clone());
        let api = ControlApi::new(&supervisor, &store);

        let root = tempfile::tempdir().unwrap();
        api.start(test_config(root.path().to_path_buf())).await.unwrap();
        assert!(api.status().await.running);

        api.stop().await.unwrap();
        assert!(!api.status().await.running);
    }

    #[tokio::test]
    async fn statistics_reports_zero_counts_on_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory().await.unwrap();
        let supervisor = Supervisor::new(dir.path().to_path_buf(), store.clone());
        let api = ControlApi::new(&supervisor, &store);

        let stats = api.statistics().await.unwrap();
        assert_eq!(stats.total_logs, 0);
        assert_eq!(stats.risk_counts.total, 0);
    }
}
