//! Config Store (§4.1, C1): loads the on-disk JSON document into a
//! validated `MonitorConfig` and serves it with hot-reload support.
//!
//! The on-disk shape (`RawConfig`) is JSON rather than TOML, but
//! `ConfigManager` keeps the `Arc<RwLock<...>>` snapshot plus
//! `broadcast::Sender` change-notification plus mtime-polling hot-reload
//! task shape unchanged (§10.4).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use vigil_core::{MonitorConfig, RetentionPolicy};

/// On-disk configuration document (§6). Unknown fields are ignored;
/// missing fields take the defaults named in §4.1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawConfig {
    pub paths: Vec<PathBuf>,
    #[serde(default)]
    pub excludes: Vec<PathBuf>,
    #[serde(default)]
    pub excluded_extensions: Vec<String>,
    #[serde(default = "default_scan_interval_seconds")]
    pub scan_interval_seconds: u64,
    #[serde(default = "default_dedup_window_seconds")]
    pub dedup_window_seconds: u64,
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,
    #[serde(default)]
    pub log_retention: RawRetention,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRetention {
    #[serde(default = "default_true")]
    pub auto_cleanup_enabled: bool,
    #[serde(default = "default_max_records")]
    pub max_records: i64,
    #[serde(default = "default_days_to_keep")]
    pub days_to_keep: i64,
    #[serde(default = "default_cleanup_interval_hours")]
    pub cleanup_interval_hours: u64,
}

fn default_scan_interval_seconds() -> u64 {
    1
}
fn default_dedup_window_seconds() -> u64 {
    5
}
fn default_max_file_size_bytes() -> u64 {
    10 * 1024 * 1024
}
fn default_true() -> bool {
    true
}
fn default_max_records() -> i64 {
    1000
}
fn default_days_to_keep() -> i64 {
    3
}
fn default_cleanup_interval_hours() -> u64 {
    6
}

impl Default for RawRetention {
    fn default() -> Self {
        Self {
            auto_cleanup_enabled: default_true(),
            max_records: default_max_records(),
            days_to_keep: default_days_to_keep(),
            cleanup_interval_hours: default_cleanup_interval_hours(),
        }
    }
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            excludes: Vec::new(),
            excluded_extensions: Vec::new(),
            scan_interval_seconds: default_scan_interval_seconds(),
            dedup_window_seconds: default_dedup_window_seconds(),
            max_file_size_bytes: default_max_file_size_bytes(),
            log_retention: RawRetention::default(),
        }
    }
}

impl RawConfig {
    /// Normalizes and validates this document into the in-memory
    /// `MonitorConfig` the Supervisor consumes (§4.1). `recursive` has no
    /// external JSON field (§3 note) and defaults to `true`.
    pub fn into_monitor_config(self) -> Result<MonitorConfig> {
        let mut roots = Vec::with_capacity(self.paths.len());
        for path in &self.paths {
            roots.push(
                MonitorConfig::normalize_path(path)
                    .with_context(|| format!("invalid root path: {}", path.display()))?,
            );
        }

        let mut excludes = Vec::with_capacity(self.excludes.len());
        for path in &self.excludes {
            excludes.push(
                MonitorConfig::normalize_path(path)
                    .with_context(|| format!("invalid exclude path: {}", path.display()))?,
            );
        }

        let excluded_extensions: HashSet<String> = self
            .excluded_extensions
            .iter()
            .map(|ext| ext.to_lowercase())
            .collect();

        let config = MonitorConfig {
            roots,
            recursive: true,
            excludes,
            excluded_extensions,
            max_file_size_bytes: self.max_file_size_bytes,
            dedup_window: Duration::from_secs(self.dedup_window_seconds),
            scan_interval: Duration::from_secs(self.scan_interval_seconds),
            retention: RetentionPolicy {
                max_records: self.log_retention.max_records,
                days_to_keep: self.log_retention.days_to_keep,
                cleanup_interval: Duration::from_secs(self.log_retention.cleanup_interval_hours * 3600),
                auto_enabled: self.log_retention.auto_cleanup_enabled,
            },
        };

        config.validate().context("configuration failed validation")?;
        Ok(config)
    }

    fn from_monitor_config(config: &MonitorConfig) -> Self {
        Self {
            paths: config.roots.clone(),
            excludes: config.excludes.clone(),
            excluded_extensions: config.excluded_extensions.iter().cloned().collect(),
            scan_interval_seconds: config.scan_interval.as_secs(),
            dedup_window_seconds: config.dedup_window.as_secs(),
            max_file_size_bytes: config.max_file_size_bytes,
            log_retention: RawRetention {
                auto_cleanup_enabled: config.retention.auto_enabled,
                max_records: config.retention.max_records,
                days_to_keep: config.retention.days_to_keep,
                cleanup_interval_hours: config.retention.cleanup_interval.as_secs() / 3600,
            },
        }
    }
}

/// Scratch-file glob patterns excluded from watching regardless of config
/// (§4.2). Kept as a `GlobSet` even though the Root Watcher compiles its
/// own copy, mirroring the `CompiledPatterns` idiom (§10.4).
const SCRATCH_PATTERNS: &[&str] = &["~$*", "*.tmp", "*.temp", ".*"];

/// Compiled glob patterns, built once per config load.
#[derive(Debug, Clone)]
pub struct CompiledPatterns {
    scratch: GlobSet,
}

impl CompiledPatterns {
    fn compile() -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in SCRATCH_PATTERNS {
            let glob =
                Glob::new(pattern).with_context(|| format!("invalid scratch pattern: {}", pattern))?;
            builder.add(glob);
        }
        Ok(Self {
            scratch: builder.build()?,
        })
    }

    pub fn is_scratch_file(&self, name: &std::ffi::OsStr) -> bool {
        self.scratch.is_match(name)
    }
}

/// Configuration manager with hot-reload capability (§4.1, §10.4).
pub struct ConfigManager {
    config: Arc<RwLock<MonitorConfig>>,
    patterns: Arc<RwLock<CompiledPatterns>>,
    config_path: Option<PathBuf>,
    change_sender: broadcast::Sender<MonitorConfig>,
}

impl ConfigManager {
    /// Creates a manager seeded with the default (empty-roots) config.
    /// Callers normally follow with `load_from_file`.
    pub fn new() -> Self {
        let config = MonitorConfig::default();
        let patterns = CompiledPatterns::compile().expect("scratch patterns should be valid");
        let (change_sender, _) = broadcast::channel(10);

        Self {
            config: Arc::new(RwLock::new(config)),
            patterns: Arc::new(RwLock::new(patterns)),
            config_path: None,
            change_sender,
        }
    }

    /// Loads and validates a JSON config document, replacing the current
    /// in-memory snapshot and notifying subscribers.
    pub async fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let config_str = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let raw: RawConfig =
            serde_json::from_str(&config_str).with_context(|| "failed to parse config file")?;
        let new_config = raw.into_monitor_config()?;
        let patterns = CompiledPatterns::compile()?;

        {
            let mut config_guard = self.config.write().await;
            *config_guard = new_config.clone();
        }
        {
            let mut patterns_guard = self.patterns.write().await;
            *patterns_guard = patterns;
        }

        self.config_path = Some(path.to_path_buf());

        if let Err(e) = self.change_sender.send(new_config) {
            debug!("no config change subscribers: {}", e);
        }

        info!("loaded configuration from: {}", path.display());
        Ok(())
    }

    /// Writes the current snapshot back out as JSON.
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let config = self.config.read().await;
        let raw = RawConfig::from_monitor_config(&config);
        let json = serde_json::to_string_pretty(&raw)?;

        tokio::fs::write(path.as_ref(), json)
            .await
            .with_context(|| format!("failed to write config file: {}", path.as_ref().display()))?;

        info!("saved configuration to: {}", path.as_ref().display());
        Ok(())
    }

    pub async fn get_config(&self) -> MonitorConfig {
        self.config.read().await.clone()
    }

    pub async fn get_patterns(&self) -> CompiledPatterns {
        self.patterns.read().await.clone()
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<MonitorConfig> {
        self.change_sender.subscribe()
    }

    /// Spawns a task polling the config file's mtime every second,
    /// reloading on change (§10.4).
    pub async fn start_hot_reload(&self) -> Result<()> {
        let config_path = self
            .config_path
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no config file loaded"))?
            .clone();

        let config = Arc::clone(&self.config);
        let patterns = Arc::clone(&self.patterns);
        let change_sender = self.change_sender.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            let mut last_modified = None;

            loop {
                interval.tick().await;

                match tokio::fs::metadata(&config_path).await {
                    Ok(metadata) => {
                        let modified = metadata.modified().ok();

                        if last_modified.is_none() {
                            last_modified = modified;
                            continue;
                        }

                        if modified != last_modified {
                            last_modified = modified;

                            match Self::reload_config(&config_path, &config, &patterns).await {
                                Ok(new_config) => {
                                    info!("hot-reloaded configuration");
                                    let _ = change_sender.send(new_config);
                                }
                                Err(e) => {
                                    warn!("failed to hot-reload config: {}", e);
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!("failed to check config file: {}", e);
                    }
                }
            }
        });

        info!("started configuration hot-reload monitoring");
        Ok(())
    }

    async fn reload_config(
        path: &Path,
        config: &Arc<RwLock<MonitorConfig>>,
        patterns: &Arc<RwLock<CompiledPatterns>>,
    ) -> Result<MonitorConfig> {
        let config_str = tokio::fs::read_to_string(path).await?;
        let raw: RawConfig = serde_json::from_str(&config_str)?;
        let new_config = raw.into_monitor_config()?;
        let new_patterns = CompiledPatterns::compile()?;

        {
            let mut config_guard = config.write().await;
            *config_guard = new_config.clone();
        }
        {
            let mut patterns_guard = patterns.write().await;
            *patterns_guard = new_patterns;
        }

        Ok(new_config)
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_config_load_save() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let json = serde_json::json!({
            "paths": ["/tmp"],
            "scan_interval_seconds": 2,
            "log_retention": { "max_records": 500 }
        });
        let mut file = tokio::fs::File::create(temp_file.path()).await.unwrap();
        file.write_all(json.to_string().as_bytes()).await.unwrap();
        file.flush().await.unwrap();
        drop(file);

        let mut manager = ConfigManager::new();
        manager.load_from_file(temp_file.path()).await.unwrap();

        let config = manager.get_config().await;
        assert_eq!(config.roots, vec![PathBuf::from("/tmp")]);
        assert_eq!(config.scan_interval, Duration::from_secs(2));
        assert_eq!(config.retention.max_records, 500);
        assert_eq!(config.retention.days_to_keep, 3); // default
        temp_file.close().unwrap();
    }

    #[tokio::test]
    async fn rejects_relative_path() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let json = serde_json::json!({ "paths": ["relative/dir"] });
        tokio::fs::write(temp_file.path(), json.to_string()).await.unwrap();

        let mut manager = ConfigManager::new();
        assert!(manager.load_from_file(temp_file.path()).await.is_err());
        temp_file.close().unwrap();
    }

    #[test]
    fn scratch_patterns_match_platform_temp_files() {
        let patterns = CompiledPatterns::compile().unwrap();
        assert!(patterns.is_scratch_file(std::ffi::OsStr::new("~$doc.docx")));
        assert!(patterns.is_scratch_file(std::ffi::OsStr::new("cache.tmp")));
        assert!(!patterns.is_scratch_file(std::ffi::OsStr::new("report.pdf")));
    }
}
