//! `MonitorConfig`: the immutable, validated snapshot the Config Store (C1)
//! produces and the Supervisor consumes. JSON (de)serialization of the
//! on-disk shape lives in `vigil-daemon::config` — this type is the
//! normalized, already-validated in-memory entity described in §3.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{VigilError, VigilResult};

/// Retention policy applied by the Retention Manager (§4.7).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub max_records: i64,
    pub days_to_keep: i64,
    pub cleanup_interval: Duration,
    pub auto_enabled: bool,
}

impl RetentionPolicy {
    pub const EMERGENCY: RetentionPolicy = RetentionPolicy {
        max_records: 500,
        days_to_keep: 1,
        cleanup_interval: Duration::from_secs(6 * 3600),
        auto_enabled: true,
    };

    fn validate(&self) -> VigilResult<()> {
        if self.max_records < 0 {
            return Err(VigilError::ConfigInvalid(format!(
                "max_records must be >= 0, got {}",
                self.max_records
            )));
        }
        Ok(())
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_records: 1000,
            days_to_keep: 3,
            cleanup_interval: Duration::from_secs(6 * 3600),
            auto_enabled: true,
        }
    }
}

/// Immutable configuration snapshot (§3, §4.1). One of these is built by
/// `vigil-daemon::config::ConfigManager` from the on-disk JSON document and
/// handed to the Supervisor at start and on every reconfiguration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Ordered set of absolute, canonicalized root paths.
    pub roots: Vec<PathBuf>,
    /// Whether each root is walked recursively. Applies uniformly; the
    /// external JSON schema (§6) does not expose per-root recursion, so
    /// the per-root flag named in §3 collapses to one process-wide default.
    pub recursive: bool,
    /// Absolute exclusion prefixes, canonical form.
    pub excludes: Vec<PathBuf>,
    /// Lower-cased extensions (with leading dot) excluded from watching.
    pub excluded_extensions: HashSet<String>,
    /// 0 means unlimited beyond the hard safety cap.
    pub max_file_size_bytes: u64,
    pub dedup_window: Duration,
    pub scan_interval: Duration,
    pub retention: RetentionPolicy,
}

/// Hard safety cap applied regardless of `max_file_size_bytes = 0`.
pub const HARD_MAX_FILE_SIZE_BYTES: u64 = 512 * 1024 * 1024;

impl MonitorConfig {
    /// Normalize a root/exclusion path: must already be absolute; we only
    /// lexically clean `.`/`..` components since canonicalizing a path
    /// that may not exist yet (e.g. a not-yet-created root) would fail.
    pub fn normalize_path(path: &Path) -> VigilResult<PathBuf> {
        if !path.is_absolute() {
            return Err(VigilError::ConfigInvalid(format!(
                "path must be absolute: {}",
                path.display()
            )));
        }
        let mut normalized = PathBuf::new();
        for component in path.components() {
            use std::path::Component;
            match component {
                Component::ParentDir => {
                    normalized.pop();
                }
                Component::CurDir => {}
                other => normalized.push(other.as_os_str()),
            }
        }
        Ok(normalized)
    }

    /// Effective per-file analysis size limit, 0 in config meaning
    /// "unlimited beyond the hard cap".
    pub fn effective_max_file_size(&self) -> u64 {
        if self.max_file_size_bytes == 0 {
            HARD_MAX_FILE_SIZE_BYTES
        } else {
            self.max_file_size_bytes.min(HARD_MAX_FILE_SIZE_BYTES)
        }
    }

    /// True if `path` falls under any configured exclusion prefix.
    pub fn is_excluded(&self, path: &Path) -> bool {
        self.excludes.iter().any(|prefix| path.starts_with(prefix))
    }

    /// True if `path`'s lower-cased extension is excluded.
    pub fn is_excluded_extension(&self, path: &Path) -> bool {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => self
                .excluded_extensions
                .contains(&format!(".{}", ext.to_lowercase())),
            None => false,
        }
    }

    pub fn validate(&self) -> VigilResult<()> {
        if self.roots.is_empty() {
            return Err(VigilError::ConfigInvalid(
                "at least one root path is required".into(),
            ));
        }

        let mut seen = HashSet::new();
        for root in &self.roots {
            if !root.is_absolute() {
                return Err(VigilError::ConfigInvalid(format!(
                    "root path must be absolute: {}",
                    root.display()
                )));
            }
            if !seen.insert(root.clone()) {
                return Err(VigilError::ConfigInvalid(format!(
                    "duplicate root path after normalization: {}",
                    root.display()
                )));
            }
        }

        self.retention.validate()?;
        Ok(())
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            recursive: true,
            excludes: Vec::new(),
            excluded_extensions: HashSet::new(),
            max_file_size_bytes: 10 * 1024 * 1024,
            dedup_window: Duration::from_secs(5),
            scan_interval: Duration::from_secs(1),
            retention: RetentionPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_relative_root() {
        let mut config = MonitorConfig {
            roots: vec![PathBuf::from("relative/path")],
            ..MonitorConfig::default()
        };
        assert!(config.validate().is_err());
        config.roots = vec![PathBuf::from("/abs/path")];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_duplicate_roots() {
        let config = MonitorConfig {
            roots: vec![PathBuf::from("/a"), PathBuf::from("/a")],
            ..MonitorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_negative_max_records() {
        let mut config = MonitorConfig {
            roots: vec![PathBuf::from("/a")],
            ..MonitorConfig::default()
        };
        config.retention.max_records = -1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn exclusion_is_prefix_based() {
        let config = MonitorConfig {
            roots: vec![PathBuf::from("/a")],
            excludes: vec![PathBuf::from("/a/b")],
            ..MonitorConfig::default()
        };
        assert!(config.is_excluded(Path::new("/a/b/c.txt")));
        assert!(!config.is_excluded(Path::new("/a/c.txt")));
    }

    #[test]
    fn zero_max_file_size_falls_back_to_hard_cap() {
        let config = MonitorConfig {
            roots: vec![PathBuf::from("/a")],
            max_file_size_bytes: 0,
            ..MonitorConfig::default()
        };
        assert_eq!(config.effective_max_file_size(), HARD_MAX_FILE_SIZE_BYTES);
    }
}
