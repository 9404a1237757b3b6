//! Project file excerpts for `llm_call` prompts.
//!
//! Files are ranked by how many prompt keywords their relative path mentions
//! (plus file-type hints such as "html" or "styles"). Excerpts are capped per
//! file and in total. With no match, the caller gets the project tree instead.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::Serialize;
use tracing::debug;

use crate::core::sanitize::truncate_bytes;
use crate::io::config::ContextConfig;
use crate::io::workspace::snapshot_files;

const SCAN_LIMIT: usize = 2_000;
const TREE_LIMIT: usize = 200;

const STOPWORDS: &[&str] = &[
    "this", "that", "with", "from", "into", "para", "have", "make", "should", "would", "there",
    "their", "about", "which", "where", "when", "file", "files", "code", "please", "using", "also",
];

const TYPE_HINTS: &[(&str, &[&str])] = &[
    ("html", &[".html"]),
    ("template", &[".html"]),
    ("markup", &[".html"]),
    ("css", &[".css", ".scss"]),
    ("scss", &[".scss"]),
    ("style", &[".css", ".scss"]),
    ("styles", &[".css", ".scss"]),
    ("test", &[".spec.ts"]),
    ("tests", &[".spec.ts"]),
    ("spec", &[".spec.ts"]),
    ("service", &[".service.ts"]),
    ("route", &[".routes.ts"]),
    ("routes", &[".routes.ts"]),
    ("routing", &[".routes.ts", "routing"]),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileExcerpt {
    pub path: String,
    pub content: String,
    pub truncated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PromptContext {
    pub excerpts: Vec<FileExcerpt>,
    /// Filled only when no file matched the prompt.
    pub tree: Vec<String>,
}

impl PromptContext {
    pub fn paths(&self) -> Vec<String> {
        self.excerpts.iter().map(|e| e.path.clone()).collect()
    }
}

/// Lowercase keywords of at least four characters, minus stopwords.
pub fn keywords(prompt: &str) -> BTreeSet<String> {
    prompt
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .map(|word| word.trim_matches('-').to_lowercase())
        .filter(|word| word.chars().count() >= 4 || is_type_hint(word))
        .filter(|word| !STOPWORDS.contains(&word.as_str()))
        .collect()
}

fn is_type_hint(word: &str) -> bool {
    TYPE_HINTS.iter().any(|(hint, _)| *hint == word)
}

fn score(path: &str, words: &BTreeSet<String>) -> usize {
    let lower = path.to_lowercase();
    words
        .iter()
        .map(|word| {
            let named = usize::from(lower.contains(word.as_str()));
            let typed = TYPE_HINTS
                .iter()
                .filter(|(hint, _)| *hint == word.as_str())
                .any(|(_, suffixes)| suffixes.iter().any(|s| lower.contains(s)));
            named + usize::from(typed)
        })
        .sum()
}

/// Collect excerpts relevant to `prompt` from files under `root`.
pub fn collect_context(root: &Path, prompt: &str, cfg: &ContextConfig) -> Result<PromptContext> {
    let words = keywords(prompt);
    let files = snapshot_files(root, SCAN_LIMIT)?;

    let mut ranked: Vec<(usize, &String)> = files
        .iter()
        .map(|path| (score(path, &words), path))
        .filter(|(score, _)| *score > 0)
        .collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));

    let mut excerpts = Vec::new();
    let mut remaining = cfg.max_total_bytes;
    for (_, rel) in ranked.into_iter().take(cfg.max_files) {
        if remaining == 0 {
            break;
        }
        let Ok(raw) = fs::read_to_string(root.join(rel)) else {
            continue;
        };
        let cap = cfg.max_file_bytes.min(remaining);
        let content = truncate_bytes(&raw, cap).to_string();
        remaining -= content.len();
        excerpts.push(FileExcerpt {
            path: rel.clone(),
            truncated: content.len() < raw.len(),
            content,
        });
    }

    if excerpts.is_empty() {
        let mut tree = files;
        tree.truncate(TREE_LIMIT);
        debug!(files = tree.len(), "no relevant files, falling back to tree");
        return Ok(PromptContext { excerpts, tree });
    }
    debug!(
        files = excerpts.len(),
        bytes = cfg.max_total_bytes - remaining,
        "collected excerpts"
    );
    Ok(PromptContext {
        excerpts,
        tree: Vec::new(),
    })
}
