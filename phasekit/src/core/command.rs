//! Shell command text inspection: segments, prefixes, and `cd` targets.
//!
//! Matching is token-based and case-insensitive, so `ng serve` blocks
//! `ng serve --open` but `ng test --watch` does not block `ng test --watch=false`.

use std::sync::LazyLock;

use regex::Regex;

static SEPARATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&&|\|\||;|\|").expect("separator regex"));

/// Simple commands of a compound command line, trimmed, empty ones dropped.
pub fn segments(command: &str) -> Vec<&str> {
    SEPARATOR_RE
        .split(command)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect()
}

fn tokens(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

/// Some segment starts with the tokens of `prefix`.
pub fn starts_with_tokens(command: &str, prefix: &str) -> bool {
    let wanted = tokens(prefix);
    !wanted.is_empty()
        && segments(command)
            .iter()
            .any(|segment| tokens(segment).starts_with(&wanted))
}

/// Some segment contains the tokens of `needle` contiguously.
pub fn contains_tokens(command: &str, needle: &str) -> bool {
    let wanted = tokens(needle);
    !wanted.is_empty()
        && segments(command).iter().any(|segment| {
            tokens(segment)
                .windows(wanted.len())
                .any(|window| window == wanted.as_slice())
        })
}

/// First entry of `patterns` that some segment starts with.
pub fn find_interactive<'a>(command: &str, patterns: &'a [String]) -> Option<&'a str> {
    patterns
        .iter()
        .map(String::as_str)
        .find(|pattern| starts_with_tokens(command, pattern))
}

/// Case-insensitive substring match against any pattern.
pub fn is_create_command(command: &str, patterns: &[String]) -> bool {
    let lower = command.to_lowercase();
    patterns
        .iter()
        .any(|pattern| !pattern.trim().is_empty() && lower.contains(&pattern.to_lowercase()))
}

/// Arguments of every `cd` segment, in order, with surrounding quotes removed.
/// A bare `cd` yields nothing.
pub fn cd_targets(command: &str) -> Vec<String> {
    segments(command)
        .into_iter()
        .filter_map(|segment| {
            let mut parts = segment.split_whitespace();
            (parts.next() == Some("cd"))
                .then(|| parts.next())
                .flatten()
                .map(|target| target.trim_matches(|c| c == '"' || c == '\'').to_string())
        })
        .filter(|target| !target.is_empty())
        .collect()
}
