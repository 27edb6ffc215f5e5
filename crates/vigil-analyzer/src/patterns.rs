//! Compiled-once pattern tables for the textual content scan (§4.5.1),
//! grounded in `simple_analyzer.py`'s `dangerous_patterns`/
//! `obfuscation_patterns` dicts.

use once_cell::sync::Lazy;
use regex::Regex;

/// One threat category's compiled patterns plus its severity multiplier.
pub struct PatternCategory {
    pub name: &'static str,
    pub multiplier: f64,
    pub patterns: Vec<Regex>,
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("pattern table regex must compile"))
        .collect()
}

pub static CATEGORIES: Lazy<Vec<PatternCategory>> = Lazy::new(|| {
    vec![
        PatternCategory {
            name: "command_injection",
            multiplier: 3.0,
            patterns: compile(&[
                r#"(?i)os\.system\(\s*["'].*(?:rm|del|format|mkfs|dd).*["']"#,
                r#"(?i)subprocess\.(call|Popen|getoutput)\(\s*["'].*(?:rm|del|format|mkfs|dd).*["']"#,
                r#"(?i)exec\(\s*["'].*(?:rm|del|format|mkfs|dd).*["']"#,
                r"(?i)eval\(\s*[^)]+\)",
                r"(?i)shell\s*=\s*True",
            ]),
        },
        PatternCategory {
            name: "hardcoded_credentials",
            multiplier: 2.0,
            patterns: compile(&[
                r#"(?i)password\s*=\s*["'][^"']{8,}["']"#,
                r#"(?i)secret[\w_]*\s*=\s*["'][^"']{8,}["']"#,
                r#"(?i)api[_]?key\s*=\s*["'][^"']{8,}["']"#,
                r#"(?i)token\s*=\s*["'][^"']{8,}["']"#,
                r#"(?i)credentials\s*=\s*["'][^"']{8,}["']"#,
                r#"(?i)auth[\w_]*\s*=\s*["'][^"']{8,}["']"#,
            ]),
        },
        PatternCategory {
            name: "unsafe_network",
            multiplier: 1.5,
            patterns: compile(&[
                r"(?i)socket\.socket\(\s*.*,\s*.*SOCK_RAW",
                r#"(?i)bind\(["']0\.0\.0\.0["']"#,
                r#"(?i)requests\.get\(\s*["']https?://[^"']+["'],\s*verify\s*=\s*False"#,
                r#"(?i)urllib[23]?\.urlopen\(\s*["']https?://[^"']+["'],\s*context=unverified_context"#,
            ]),
        },
        PatternCategory {
            name: "file_operations",
            multiplier: 0.8,
            patterns: compile(&[
                r#"(?i)open\([^)]+,\s*["']w["']"#,
                r"(?i)\.unlink\(\)",
                r"(?i)shutil\.(copy|move|rmtree)",
                r"(?i)os\.(remove|unlink|rmdir)",
            ]),
        },
        PatternCategory {
            name: "crypto_concerns",
            multiplier: 1.2,
            patterns: compile(&[
                r"(?i)hashlib\.md5\(",
                r"(?i)hashlib\.sha1\(",
                r"(?i)random\.random\(",
                r"(?i)random\.seed\(",
            ]),
        },
        PatternCategory {
            name: "malware_indicators",
            multiplier: 3.0,
            patterns: compile(&[
                r"(?i)\.encrypt\(",
                r"(?i)\.crypt\(",
                r"(?i)base64\.(?:b64encode|b64decode|encodestring)",
                r"(?i)exec\(base64\.b64decode",
                r"(?i)exec\(eval",
                r#"(?i)__import__\(["']subprocess["']\)"#,
                r"(?i)GetWindowsDirectory|GetSystemDirectory",
                r"(?i)CreateProcess|ShellExecute",
                r"(?i)WSASocket|socket",
                r"(?i)URLDownloadToFile",
                r"(?i)AdjustTokenPrivileges",
                r"(?i)VirtualAlloc|VirtualProtect",
                r"(?i)CreateRemoteThread",
            ]),
        },
    ]
});

pub static OBFUSCATION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)chr\(\d+\)",
        r"(?i)\\x[0-9a-fA-F]{2}",
        r"(?i)String\.fromCharCode",
        r"(?i)eval\(.*\)",
        r"(?i)unescape\(",
        r"(?i)document\.write\(.*\)",
    ])
});

pub const OBFUSCATION_MULTIPLIER: f64 = 2.5;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_cover_the_six_regex_families() {
        let mut names: Vec<&str> = CATEGORIES.iter().map(|c| c.name).collect();
        names.sort_unstable();
        assert_eq!(
            names,
            vec![
                "command_injection",
                "crypto_concerns",
                "file_operations",
                "hardcoded_credentials",
                "malware_indicators",
                "unsafe_network",
            ]
        );
    }

    #[test]
    fn command_injection_matches_shell_true() {
        let category = CATEGORIES.iter().find(|c| c.name == "command_injection").unwrap();
        assert!(category.patterns.iter().any(|p| p.is_match("shell=True")));
    }

    #[test]
    fn obfuscation_matches_char_codes() {
        assert!(OBFUSCATION_PATTERNS.iter().any(|p| p.is_match("chr(101)")));
    }
}
