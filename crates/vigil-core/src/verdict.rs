//! The Analyzer's output entity and the external verdict JSON contract
//! (§4.5, §6), grounded in `simple_analyzer.py`'s `analysis_result` dict.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Overall risk bucket, derived from the aggregate `risk_score`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Safe,
    Moderate,
    Suspicious,
    Dangerous,
}

impl RiskLevel {
    /// Thresholds from the original analyzer: >=50 dangerous, >=25
    /// suspicious, >=10 moderate, else safe. Tie-breaks go to the lower
    /// level, so the comparisons below are strict `>=`.
    pub fn from_score(score: f64) -> Self {
        if score >= 50.0 {
            RiskLevel::Dangerous
        } else if score >= 25.0 {
            RiskLevel::Suspicious
        } else if score >= 10.0 {
            RiskLevel::Moderate
        } else {
            RiskLevel::Safe
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Safe => "safe",
            RiskLevel::Moderate => "moderate",
            RiskLevel::Suspicious => "suspicious",
            RiskLevel::Dangerous => "dangerous",
        }
    }
}

/// Per-finding severity, derived from the pattern category's multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn from_multiplier(multiplier: f64) -> Self {
        if multiplier >= 2.5 {
            Severity::High
        } else if multiplier >= 1.5 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
        }
    }
}

/// Static file metadata captured at analysis time (`file_info` in the
/// verdict JSON contract).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: PathBuf,
    pub name: String,
    pub hash: String,
    pub extension: String,
    pub size: u64,
    pub mime_type: String,
}

/// A coarse threat summary, one per category that produced a match (or an
/// extension/binary signature hit).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Threat {
    pub category: String,
    pub severity: f64,
    pub details: String,
    pub instances: Vec<String>,
}

/// A single, more structured finding underlying `recommendation` text
/// generation — one per threat, carrying the human-readable advisory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
    pub recommendation: String,
}

/// The Analyzer's full output for one file (§4.5, §6's verdict JSON shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub file_info: FileInfo,
    pub risk_level: RiskLevel,
    pub risk_score: f64,
    pub threats: Vec<Threat>,
    pub findings: Vec<Finding>,
    pub is_binary: bool,
    pub metadata: serde_json::Value,
    pub recommendation: String,
    pub produced_at: DateTime<Utc>,
}

impl Verdict {
    /// External JSON contract (§6), nested as `file_info` /
    /// `risk_analysis` / `metadata` / `recommendation` / `timestamp`.
    /// Fields are emitted through a typed struct so repeated calls on
    /// identical input produce byte-identical output once `timestamp`
    /// is normalized by the caller (§4.5.4, §8).
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "file_info": {
                "path": self.file_info.path,
                "name": self.file_info.name,
                "hash": self.file_info.hash,
                "extension": self.file_info.extension,
                "size": self.file_info.size,
                "mime_type": self.file_info.mime_type,
            },
            "risk_analysis": {
                "risk_level": self.risk_level.as_str(),
                "overall_score": self.risk_score,
                "threats": self.threats,
                "detailed_findings": self.findings,
                "is_binary": self.is_binary,
            },
            "metadata": self.metadata,
            "recommendation": self.recommendation,
            "timestamp": self.produced_at.to_rfc3339(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_level_thresholds() {
        assert_eq!(RiskLevel::from_score(0.0), RiskLevel::Safe);
        assert_eq!(RiskLevel::from_score(9.9), RiskLevel::Safe);
        assert_eq!(RiskLevel::from_score(10.0), RiskLevel::Moderate);
        assert_eq!(RiskLevel::from_score(24.9), RiskLevel::Moderate);
        assert_eq!(RiskLevel::from_score(25.0), RiskLevel::Suspicious);
        assert_eq!(RiskLevel::from_score(49.9), RiskLevel::Suspicious);
        assert_eq!(RiskLevel::from_score(50.0), RiskLevel::Dangerous);
    }

    #[test]
    fn severity_from_multiplier() {
        assert_eq!(Severity::from_multiplier(3.0), Severity::High);
        assert_eq!(Severity::from_multiplier(2.0), Severity::Medium);
        assert_eq!(Severity::from_multiplier(0.8), Severity::Low);
    }
}
