//! Extension risk tables and a small built-in MIME lookup, grounded in
//! `simple_analyzer.py`'s `dangerous_extensions`/`safe_extensions` and its
//! use of Python's `mimetypes.guess_type`.

use once_cell::sync::Lazy;
use std::collections::HashSet;

pub const MALWARE_EXTENSIONS: &[&str] = &[
    ".ransomware",
    ".locked",
    ".encrypted",
    ".crypt",
    ".crypted",
    ".r5a",
    ".abc",
    ".aaa",
    ".ecc",
    ".ez",
    ".ezz",
    ".exx",
    ".zzz",
    ".xyz",
    ".locky",
    ".cerber",
    ".zepto",
    ".dharma",
    ".wallet",
    ".bip",
    ".wncry",
    ".osiris",
    ".kraken",
];

pub const EXECUTABLE_EXTENSIONS: &[&str] = &[
    ".exe", ".dll", ".sys", ".com", ".bat", ".cmd", ".ps1", ".vbs", ".js", ".jar", ".bin", ".msi",
    ".scr", ".pif", ".gadget", ".msc", ".cpl",
];

pub const SCRIPT_EXTENSIONS: &[&str] = &[
    ".py", ".rb", ".sh", ".php", ".pl", ".asp", ".aspx", ".jsp", ".cgi", ".htaccess", ".psm1",
    ".psd1", ".ps1xml", ".pssc", ".cdxml",
];

pub const SAFE_EXTENSIONS: &[&str] = &[
    ".txt", ".csv", ".md", ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".pdf", ".docx", ".xlsx",
    ".pptx", ".odt", ".rtf", ".ico", ".svg", ".mp3", ".mp4", ".wav", ".avi", ".mov", ".mkv",
];

static MALWARE_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| MALWARE_EXTENSIONS.iter().copied().collect());
static EXECUTABLE_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| EXECUTABLE_EXTENSIONS.iter().copied().collect());
static SCRIPT_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| SCRIPT_EXTENSIONS.iter().copied().collect());

/// Outcome of checking a file's extension against the risk tables.
pub struct ExtensionRisk {
    pub category: &'static str,
    pub severity: f64,
    pub score: f64,
    pub description: String,
}

/// `None` when the extension is not in any risky table.
pub fn check_extension_risk(ext: &str) -> Option<ExtensionRisk> {
    if MALWARE_SET.contains(ext) {
        return Some(ExtensionRisk {
            category: "malware_extension",
            severity: 3.0,
            score: 30.0,
            description: format!(
                "File has a known malware extension: {ext}. This extension is commonly \
                 associated with ransomware or other malicious software."
            ),
        });
    }
    if EXECUTABLE_SET.contains(ext) {
        return Some(ExtensionRisk {
            category: "executable_extension",
            severity: 2.0,
            score: 20.0,
            description: format!(
                "File has an executable extension: {ext}. Executable files can run code on \
                 your system and may pose security risks if from untrusted sources."
            ),
        });
    }
    if SCRIPT_SET.contains(ext) {
        return Some(ExtensionRisk {
            category: "script_extension",
            severity: 1.5,
            score: 15.0,
            description: format!(
                "File has a script extension: {ext}. Script files can execute code and may \
                 pose security risks if from untrusted sources."
            ),
        });
    }
    None
}

/// Extension-keyed MIME lookup, sufficient as a fallback before the
/// binary/text content sniff (§4.5.1). Extension must already be
/// lower-cased and include the leading dot.
pub fn guess_mime_type(ext: &str) -> Option<&'static str> {
    Some(match ext {
        ".txt" => "text/plain",
        ".csv" => "text/csv",
        ".md" => "text/markdown",
        ".html" | ".htm" => "text/html",
        ".css" => "text/css",
        ".js" => "text/javascript",
        ".json" => "application/json",
        ".xml" => "application/xml",
        ".py" => "text/x-python",
        ".sh" => "application/x-sh",
        ".php" => "application/x-httpd-php",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".png" => "image/png",
        ".gif" => "image/gif",
        ".bmp" => "image/bmp",
        ".svg" => "image/svg+xml",
        ".ico" => "image/x-icon",
        ".pdf" => "application/pdf",
        ".docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ".xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        ".pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        ".odt" => "application/vnd.oasis.opendocument.text",
        ".rtf" => "application/rtf",
        ".mp3" => "audio/mpeg",
        ".wav" => "audio/x-wav",
        ".mp4" => "video/mp4",
        ".avi" => "video/x-msvideo",
        ".mov" => "video/quicktime",
        ".mkv" => "video/x-matroska",
        ".exe" | ".msi" | ".com" => "application/x-msdownload",
        ".dll" | ".sys" => "application/x-msdownload",
        ".bat" | ".cmd" => "application/x-bat",
        ".jar" => "application/java-archive",
        ".zip" => "application/zip",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malware_extension_scores_highest() {
        let risk = check_extension_risk(".locked").unwrap();
        assert_eq!(risk.category, "malware_extension");
        assert_eq!(risk.severity, 3.0);
    }

    #[test]
    fn unknown_extension_is_not_risky() {
        assert!(check_extension_risk(".png").is_none());
    }

    #[test]
    fn mime_lookup_known_extension() {
        assert_eq!(guess_mime_type(".png"), Some("image/png"));
        assert_eq!(guess_mime_type(".unknownext"), None);
    }
}
