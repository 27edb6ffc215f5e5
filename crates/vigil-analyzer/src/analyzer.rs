//! The classification pipeline (§4.5), grounded in `simple_analyzer.py`'s
//! `SecurityAnalyzer.analyze_file`.

use std::path::Path;

use chrono::Utc;
use sha2::{Digest, Sha256};
use vigil_core::{FileInfo, Finding, RiskLevel, Severity, Threat, Verdict};

use crate::extensions::{check_extension_risk, guess_mime_type};
use crate::patterns::{CATEGORIES, OBFUSCATION_MULTIPLIER, OBFUSCATION_PATTERNS};

/// First 4 KiB is the sample window for the binary/text decision and for
/// the PDF-JavaScript check's 1 KiB sub-window (§4.5.1, §4.5.2).
const SNIFF_WINDOW: usize = 4096;
const PDF_JAVASCRIPT_WINDOW: usize = 1024;
/// Media files smaller than this are suspicious (§4.5.1 step 5).
const SUSPICIOUS_MEDIA_SIZE: u64 = 100_000;
const MEDIA_EXTENSIONS: &[&str] = &[".mp4", ".mov", ".avi", ".mkv"];

/// Context window radius (bytes) around a text match, for `examples`.
const CONTEXT_RADIUS: usize = 40;
const MAX_CONTEXT: usize = 3;

/// Runs the full classification pipeline over file bytes already read from
/// disk. Stateless: every pattern table is compiled once behind `Lazy`
/// statics, so two calls on identical `content` produce an identical
/// `Verdict` (§4.5.4) up to `produced_at`.
#[tracing::instrument(skip(content, metadata), fields(path = %path.display(), size = content.len()))]
pub fn analyze(path: &Path, content: &[u8], metadata: serde_json::Value) -> Verdict {
    let sha256 = to_hex(&Sha256::digest(content));
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default();
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let sniff_len = content.len().min(SNIFF_WINDOW);
    let mut is_binary = is_binary_content(&content[..sniff_len]);

    let mime_type = guess_mime_type(&ext)
        .map(str::to_string)
        .unwrap_or_else(|| {
            if is_binary {
                "application/octet-stream".to_string()
            } else {
                "text/plain".to_string()
            }
        });

    let mut threats: Vec<Threat> = Vec::new();
    let mut findings: Vec<Finding> = Vec::new();
    let mut risk_score: f64 = 0.0;

    if let Some(risk) = check_extension_risk(&ext) {
        threats.push(Threat {
            category: risk.category.to_string(),
            severity: risk.severity,
            details: risk.description.clone(),
            instances: vec![filename.clone()],
        });
        risk_score += risk.score;
        findings.push(Finding {
            kind: "file_extension".to_string(),
            severity: Severity::from_multiplier(risk.severity),
            description: risk.description,
            examples: Vec::new(),
            recommendation: format!(
                "This file has a {} extension which may pose security risks. Verify the \
                 source before opening.",
                risk.category
            ),
        });
    }

    if !is_binary {
        match std::str::from_utf8(content) {
            Ok(text) => scan_text(text, &mut threats, &mut findings, &mut risk_score),
            Err(_) => {
                // Lossy re-decode mirrors the original's `errors='replace'`
                // fallback; a hard decode failure still means binary.
                let text = String::from_utf8_lossy(content);
                scan_text(&text, &mut threats, &mut findings, &mut risk_score);
            }
        }
    }

    if is_binary {
        scan_binary(
            content,
            &mime_type,
            &mut threats,
            &mut findings,
            &mut risk_score,
        );
    } else if content.is_empty() {
        // Zero-length content has no control-character ratio to fail on;
        // keep classified as text per the sniff heuristic.
        is_binary = false;
    }

    if MEDIA_EXTENSIONS.contains(&ext.as_str()) && (content.len() as u64) < SUSPICIOUS_MEDIA_SIZE {
        let description = format!(
            "This media file is unusually small ({} bytes)",
            content.len()
        );
        threats.push(Threat {
            category: "suspicious_media_file".to_string(),
            severity: 1.5,
            details: description.clone(),
            instances: vec!["Media file is suspiciously small".to_string()],
        });
        risk_score += 15.0;
        findings.push(Finding {
            kind: "suspicious_media_file".to_string(),
            severity: Severity::Medium,
            description,
            examples: Vec::new(),
            recommendation: "This file claims to be a media file but is suspiciously small. \
                 It may be masquerading as a media file."
                .to_string(),
        });
    }

    let risk_level = RiskLevel::from_score(risk_score);
    let recommendation = generate_recommendation(&findings, risk_level, &filename);

    tracing::debug!(
        risk_level = risk_level.as_str(),
        risk_score,
        finding_count = findings.len(),
        "analyzed file"
    );

    Verdict {
        file_info: FileInfo {
            path: path.to_path_buf(),
            name: filename,
            hash: sha256,
            extension: ext,
            size: content.len() as u64,
            mime_type,
        },
        risk_level,
        risk_score,
        threats,
        findings,
        is_binary,
        metadata,
        recommendation,
        produced_at: Utc::now(),
    }
}

/// `{risk_level: moderate, finding: too_large_for_analysis}` per §4.5.3 —
/// the file is never read off disk.
pub fn too_large_verdict(path: &Path, size: u64, limit: u64) -> Verdict {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default();
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let description = format!("File ({size} bytes) exceeds the {limit}-byte analysis limit");
    Verdict {
        file_info: FileInfo {
            path: path.to_path_buf(),
            name: filename,
            hash: String::new(),
            extension: ext,
            size,
            mime_type: "application/octet-stream".to_string(),
        },
        risk_level: RiskLevel::Moderate,
        risk_score: 10.0,
        threats: Vec::new(),
        findings: vec![Finding {
            kind: "too_large_for_analysis".to_string(),
            severity: Severity::Medium,
            description: description.clone(),
            examples: Vec::new(),
            recommendation: "File was not scanned because it exceeds the configured size \
                 limit. Review it manually if the source is untrusted."
                .to_string(),
        }],
        is_binary: true,
        metadata: serde_json::Value::Null,
        recommendation: description,
        produced_at: Utc::now(),
    }
}

/// `{risk_level: moderate, finding: analysis_timeout}` per §4.5.3 — the
/// worker pool calls this when the 2 s per-job budget is exceeded.
pub fn timeout_verdict(path: &Path) -> Verdict {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default();
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let description = "Analysis did not complete within the 2 second budget".to_string();
    Verdict {
        file_info: FileInfo {
            path: path.to_path_buf(),
            name: filename,
            hash: String::new(),
            extension: ext,
            size: 0,
            mime_type: "application/octet-stream".to_string(),
        },
        risk_level: RiskLevel::Moderate,
        risk_score: 10.0,
        threats: Vec::new(),
        findings: vec![Finding {
            kind: "analysis_timeout".to_string(),
            severity: Severity::Medium,
            description: description.clone(),
            examples: Vec::new(),
            recommendation: "This file took too long to scan and was only partially \
                 evaluated. Treat with caution until it can be rescanned."
                .to_string(),
        }],
        is_binary: true,
        metadata: serde_json::Value::Null,
        recommendation: description,
        produced_at: Utc::now(),
    }
}

/// Binary if the sniff sample has a null byte, or over 30% of its bytes are
/// control characters other than tab/LF/CR (§4.5.2).
fn is_binary_content(sample: &[u8]) -> bool {
    if sample.is_empty() {
        return false;
    }
    if sample.contains(&0) {
        return true;
    }
    let control = sample
        .iter()
        .filter(|&&b| b < 32 && b != 9 && b != 10 && b != 13)
        .count();
    (control as f64 / sample.len() as f64) > 0.3
}

fn scan_text(
    text: &str,
    threats: &mut Vec<Threat>,
    findings: &mut Vec<Finding>,
    risk_score: &mut f64,
) {
    for category in CATEGORIES.iter() {
        let mut matches = Vec::new();
        let mut context_snippets = Vec::new();

        for pattern in &category.patterns {
            for m in pattern.find_iter(text) {
                matches.push(m.as_str().to_string());
                let start = m.start().saturating_sub(CONTEXT_RADIUS);
                let end = (m.end() + CONTEXT_RADIUS).min(text.len());
                let context = text[start..end].replace('\n', " ");
                context_snippets.push(format!("...{}...", context.trim()));
            }
        }

        if matches.is_empty() {
            continue;
        }

        let severity = Severity::from_multiplier(category.multiplier);
        threats.push(Threat {
            category: category.name.to_string(),
            severity: category.multiplier,
            details: format!(
                "Found {} instance(s) of {}",
                matches.len(),
                category.name.replace('_', " ")
            ),
            instances: matches.iter().take(10).cloned().collect(),
        });
        findings.push(Finding {
            kind: category.name.to_string(),
            severity,
            description: format!(
                "Detected {} pattern(s) related to {}",
                matches.len(),
                category.name.replace('_', " ")
            ),
            examples: context_snippets.into_iter().take(MAX_CONTEXT).collect(),
            recommendation: category_recommendation(category.name).to_string(),
        });
        *risk_score += matches.len() as f64 * category.multiplier * 5.0;
    }

    let mut obfuscation_matches = Vec::new();
    for pattern in OBFUSCATION_PATTERNS.iter() {
        for m in pattern.find_iter(text) {
            obfuscation_matches.push(m.as_str().to_string());
        }
    }
    if !obfuscation_matches.is_empty() {
        threats.push(Threat {
            category: "code_obfuscation".to_string(),
            severity: OBFUSCATION_MULTIPLIER,
            details: format!(
                "Found {} instance(s) of code obfuscation techniques",
                obfuscation_matches.len()
            ),
            instances: obfuscation_matches.iter().take(5).cloned().collect(),
        });
        *risk_score += obfuscation_matches.len() as f64 * OBFUSCATION_MULTIPLIER * 5.0;
        findings.push(Finding {
            kind: "code_obfuscation".to_string(),
            severity: Severity::High,
            description: "Code obfuscation techniques detected".to_string(),
            examples: obfuscation_matches.into_iter().take(2).collect(),
            recommendation: "Obfuscated code is often used to hide malicious functionality. \
                 Review this file carefully."
                .to_string(),
        });
    }
}

fn scan_binary(
    content: &[u8],
    mime_type: &str,
    threats: &mut Vec<Threat>,
    findings: &mut Vec<Finding>,
    risk_score: &mut f64,
) {
    if mime_type.starts_with("application/x-executable") || mime_type.starts_with("application/x-msdownload")
    {
        threats.push(Threat {
            category: "binary_executable".to_string(),
            severity: 2.5,
            details: "Binary executable detected".to_string(),
            instances: vec!["File identified as executable binary".to_string()],
        });
        *risk_score += 25.0;
        findings.push(Finding {
            kind: "binary_executable".to_string(),
            severity: Severity::High,
            description: "This file is a binary executable".to_string(),
            examples: Vec::new(),
            recommendation: "Only execute binaries from trusted sources. Scan with antivirus \
                 software before running."
                .to_string(),
        });
    } else if content.starts_with(b"MZ") {
        threats.push(Threat {
            category: "windows_executable".to_string(),
            severity: 2.5,
            details: "Windows executable header detected".to_string(),
            instances: vec!["File contains Windows executable header (MZ)".to_string()],
        });
        *risk_score += 25.0;
        findings.push(Finding {
            kind: "windows_executable".to_string(),
            severity: Severity::High,
            description: "This file contains a Windows executable header".to_string(),
            examples: Vec::new(),
            recommendation: "This file appears to be a Windows executable even though it \
                 doesn't have a standard executable extension. Treat with caution."
                .to_string(),
        });
    }

    if content.len() > 256 {
        let pdf_window = &content[..content.len().min(PDF_JAVASCRIPT_WINDOW)];
        if content.starts_with(b"%PDF") && contains_subslice(pdf_window, b"/JavaScript") {
            threats.push(Threat {
                category: "pdf_with_javascript".to_string(),
                severity: 2.0,
                details: "PDF with embedded JavaScript detected".to_string(),
                instances: vec![
                    "PDF contains JavaScript code which may execute automatically".to_string(),
                ],
            });
            *risk_score += 20.0;
            findings.push(Finding {
                kind: "pdf_with_javascript".to_string(),
                severity: Severity::Medium,
                description: "PDF contains embedded JavaScript code".to_string(),
                examples: Vec::new(),
                recommendation: "PDFs with JavaScript can execute code when opened. Only open \
                     from trusted sources."
                    .to_string(),
            });
        }

        if contains_subslice(content, b"vbaProject.bin") {
            threats.push(Threat {
                category: "office_with_macros".to_string(),
                severity: 2.2,
                details: "Office document with macros detected".to_string(),
                instances: vec![
                    "Document contains VBA macros which may execute automatically".to_string(),
                ],
            });
            *risk_score += 22.0;
            findings.push(Finding {
                kind: "office_with_macros".to_string(),
                severity: Severity::High,
                description: "Microsoft Office document with embedded macros".to_string(),
                examples: Vec::new(),
                recommendation: "Office macros are a common malware vector. Disable macros and \
                     only enable for trusted documents."
                    .to_string(),
            });
        }
    }
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        write!(out, "{byte:02x}").expect("writing to String cannot fail");
    }
    out
}

fn category_recommendation(category: &str) -> &'static str {
    match category {
        "command_injection" => {
            "This file contains patterns that could execute commands on your system. Only \
             run code from trusted sources."
        }
        "hardcoded_credentials" => {
            "This file contains what appear to be hardcoded credentials, which is a security \
             risk. Credentials should be stored securely, not in code."
        }
        "unsafe_network" => {
            "This file contains code that makes potentially unsafe network connections. \
             Verify the destinations are trusted."
        }
        "file_operations" => "This file performs operations that could modify other files on your system.",
        "crypto_concerns" => {
            "This file uses weak cryptographic methods that may not provide adequate security."
        }
        "malware_indicators" => {
            "This file contains patterns commonly associated with malware. Scan with \
             antivirus immediately."
        }
        _ => "This pattern may indicate security concerns. Review the code carefully.",
    }
}

/// Severity-descending findings summary plus a risk-level advisory block
/// (§4.5.1 step 7), grounded in `_generate_recommendation`.
fn generate_recommendation(findings: &[Finding], risk_level: RiskLevel, filename: &str) -> String {
    if findings.is_empty() {
        return "No security concerns detected. The file appears to be safe.".to_string();
    }

    let mut sorted: Vec<&Finding> = findings.iter().collect();
    sorted.sort_by_key(|f| match f.severity {
        Severity::High => 0,
        Severity::Medium => 1,
        Severity::Low => 2,
    });

    let mut summary = format!("Risk Level: {}\n\n", risk_level.as_str().to_uppercase());
    match risk_level {
        RiskLevel::Dangerous => {
            summary += &format!("CRITICAL SECURITY ALERT: {filename} has been flagged as DANGEROUS\n\n");
        }
        RiskLevel::Suspicious => {
            summary += &format!("WARNING: {filename} has been flagged as SUSPICIOUS\n\n");
        }
        RiskLevel::Moderate => {
            summary += &format!("CAUTION: {filename} has been flagged with MODERATE risk\n\n");
        }
        RiskLevel::Safe => {}
    }

    summary += "Key Findings:\n";
    for (i, finding) in sorted.iter().enumerate() {
        let prefix = match finding.severity {
            Severity::High => "CRITICAL: ",
            Severity::Medium => "WARNING: ",
            Severity::Low => "NOTE: ",
        };
        summary += &format!("{}. {}{}\n", i + 1, prefix, finding.description);
        if let Some(example) = finding.examples.first() {
            summary += &format!("   Examples: {example}\n");
        }
        summary += &format!("   Recommendation: {}\n\n", finding.recommendation);
    }

    match risk_level {
        RiskLevel::Dangerous => {
            summary += "IMMEDIATE ACTION RECOMMENDED:\n";
            summary += "- Do not open or execute this file\n";
            summary += "- Scan your system with antivirus software\n";
            summary += "- If you've already opened this file, disconnect from networks and seek professional help\n";
        }
        RiskLevel::Suspicious => {
            summary += "CAUTION ADVISED:\n";
            summary += "- Only open this file if you trust the source\n";
            summary += "- Scan with antivirus before proceeding\n";
            summary += "- Monitor your system for unusual behavior\n";
        }
        _ => {}
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn command_injection_trips_dangerous() {
        let content = br#"os.system("rm -rf /" + user)"#;
        let verdict = analyze(
            &PathBuf::from("/root/a.py"),
            content,
            serde_json::Value::Null,
        );
        assert_eq!(verdict.risk_level, RiskLevel::Dangerous);
        assert!(verdict.risk_score >= 50.0);
        assert!(verdict.findings.iter().any(|f| f.kind == "command_injection"));
    }

    #[test]
    fn benign_text_is_safe() {
        let verdict = analyze(
            &PathBuf::from("/root/notes.txt"),
            b"just some notes about the weekend",
            serde_json::Value::Null,
        );
        assert_eq!(verdict.risk_level, RiskLevel::Safe);
        assert!(verdict.findings.is_empty());
    }

    #[test]
    fn ransomware_extension_is_dangerous() {
        let verdict = analyze(
            &PathBuf::from("/root/doc.txt.encrypted"),
            b"binarygarbage",
            serde_json::Value::Null,
        );
        assert_eq!(verdict.risk_level, RiskLevel::Dangerous);
        assert!(verdict
            .findings
            .iter()
            .any(|f| f.kind == "file_extension"));
    }

    #[test]
    fn mz_header_detected_as_windows_executable() {
        let mut content = vec![b'M', b'Z'];
        content.extend_from_slice(&[0u8; 64]);
        let verdict = analyze(&PathBuf::from("/root/payload.bin"), &content, serde_json::Value::Null);
        assert!(verdict
            .findings
            .iter()
            .any(|f| f.kind == "windows_executable"));
    }

    #[test]
    fn small_declared_media_file_is_suspicious() {
        let verdict = analyze(
            &PathBuf::from("/root/video.mp4"),
            &[0u8; 1024],
            serde_json::Value::Null,
        );
        assert!(verdict
            .findings
            .iter()
            .any(|f| f.kind == "suspicious_media_file"));
    }

    #[test]
    fn analysis_is_deterministic() {
        let content = b"password = \"supersecretpassword\"";
        let path = PathBuf::from("/root/cfg.py");
        let first = analyze(&path, content, serde_json::Value::Null);
        let second = analyze(&path, content, serde_json::Value::Null);
        assert_eq!(first.risk_score, second.risk_score);
        assert_eq!(first.risk_level, second.risk_level);

        let mut a = first.to_json();
        let mut b = second.to_json();
        a["timestamp"] = serde_json::Value::Null;
        b["timestamp"] = serde_json::Value::Null;
        assert_eq!(a, b);
    }

    #[test]
    fn too_large_verdict_is_moderate() {
        let verdict = too_large_verdict(&PathBuf::from("/root/huge.bin"), 50_000_000, 10_000_000);
        assert_eq!(verdict.risk_level, RiskLevel::Moderate);
        assert_eq!(verdict.findings[0].kind, "too_large_for_analysis");
    }

    #[test]
    fn timeout_verdict_is_moderate() {
        let verdict = timeout_verdict(&PathBuf::from("/root/slow.bin"));
        assert_eq!(verdict.risk_level, RiskLevel::Moderate);
        assert_eq!(verdict.findings[0].kind, "analysis_timeout");
    }
}
