//! Failure fingerprints for stall detection in the autofix loop.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::core::sanitize::strip_ansi;
use crate::core::types::QualityCheckReport;

/// Lines kept when computing a signature.
pub const SIGNATURE_LINES: usize = 5;

static ERROR_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \[ERROR\]
        | \berror\b
        | \bERR!
        | \bfailed\b
        | \bFAILED\b
        | Cannot\ find\ module
        | (TS|NG)\d{4}:
        | ^\s*[X▲✖]\s
        | \bException\b
        | \bpanicked\b
        ",
    )
    .expect("error line regex")
});

static ERROR_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:TS|NG)\d{4}\b").expect("error code regex"));

/// Error-shaped lines of `output`, ANSI-stripped and trimmed, in order.
pub fn error_lines(output: &str) -> Vec<String> {
    strip_ansi(output)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && ERROR_LINE_RE.is_match(line))
        .map(str::to_string)
        .collect()
}

/// Short digest of the first few error-shaped lines; falls back to the last
/// few non-empty lines when nothing looks like an error.
pub fn error_signature(output: &str) -> String {
    let mut lines = error_lines(output);
    lines.truncate(SIGNATURE_LINES);
    if lines.is_empty() {
        let cleaned = strip_ansi(output);
        let tail: Vec<&str> = cleaned
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        let start = tail.len().saturating_sub(SIGNATURE_LINES);
        lines = tail[start..].iter().map(|line| line.to_string()).collect();
    }
    digest(&lines.join("\n"))
}

/// Sorted unique TypeScript/Angular error codes (`TS2304`, `NG8001`).
pub fn error_codes(output: &str) -> Vec<String> {
    ERROR_CODE_RE
        .find_iter(output)
        .map(|m| m.as_str().to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Signature of one quality round: every failing command with its output
/// signature, in run order. Passing checks do not contribute.
pub fn round_signature(reports: &[QualityCheckReport]) -> String {
    let mut buf = String::new();
    for report in reports.iter().filter(|r| !r.ok) {
        buf.push_str(&report.command);
        buf.push('\0');
        buf.push_str(&report.error_signature);
        buf.push('\n');
    }
    digest(&buf)
}

/// First 8 bytes of SHA-256 as hex.
fn digest(text: &str) -> String {
    let hash = Sha256::digest(text.as_bytes());
    hex::encode(&hash[..8])
}
