//! Text cleanup for oracle-authored file content and captured tool output.

use std::sync::LazyLock;

use regex::Regex;

static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07]*(\x07|\x1b\\)").expect("ansi regex")
});

const LANGUAGE_LABELS: &[&str] = &[
    "typescript", "javascript", "python", "html", "css", "scss", "sass", "json", "bash", "shell",
    "xml", "yaml", "sql", "java", "kotlin", "swift", "go", "rust", "ruby", "php", "ts", "js", "py",
    "sh", "jsx", "tsx", "text", "plaintext", "plain", "output", "console", "csharp", "c#", "c++",
    "cpp", "dockerfile", "makefile", "angular", "vue", "react", "code", "código", "codigo",
];

const INTRO_PREFIXES: &[&str] = &[
    "here's the",
    "here is the",
    "here's",
    "here is",
    "aquí tienes",
    "aqui tienes",
    "aquí está",
    "aqui esta",
    "code:",
    "solution:",
    "the file",
    "content:",
];

/// Strip terminal escape sequences.
pub fn strip_ansi(text: &str) -> String {
    ANSI_RE.replace_all(text, "").into_owned()
}

/// Expand literal `\n`/`\t` escapes when the text has no real newline.
pub fn normalize_newlines(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    if text.contains('\n') || !text.contains("\\n") {
        return text;
    }
    text.replace("\\r\\n", "\n")
        .replace("\\n", "\n")
        .replace("\\t", "\t")
}

fn is_language_label(line: &str) -> bool {
    let lower = line.trim().to_lowercase();
    let bare = lower.trim_end_matches(':');
    !bare.is_empty() && LANGUAGE_LABELS.contains(&bare)
}

fn is_intro_line(line: &str) -> bool {
    let lower = line.trim().to_lowercase();
    INTRO_PREFIXES.iter().any(|prefix| lower.starts_with(prefix))
}

/// Clean oracle-authored file content before it reaches disk.
///
/// Removes a wrapping markdown fence, up to two bare language labels, and one
/// assistant-style intro line; trims blank edges; ends with one newline.
pub fn sanitize_content(content: &str) -> String {
    let normalized = normalize_newlines(content);
    let mut lines: Vec<&str> = normalized.lines().collect();

    if lines.first().is_some_and(|l| l.trim().starts_with("```")) {
        lines.remove(0);
    }
    if lines.last().is_some_and(|l| l.trim() == "```") {
        lines.pop();
    }
    for _ in 0..2 {
        if lines.first().is_some_and(|l| is_language_label(l)) {
            lines.remove(0);
        }
    }
    if lines.first().is_some_and(|l| is_intro_line(l)) {
        lines.remove(0);
    }
    while lines.first().is_some_and(|l| l.trim().is_empty()) {
        lines.remove(0);
    }
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }

    if lines.is_empty() {
        return String::new();
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Keep the first occurrence of each item.
pub fn dedup_preserving_order<T: PartialEq + Clone>(items: &[T]) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

/// Cut `text` to at most `limit` bytes on a char boundary.
pub fn truncate_bytes(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
