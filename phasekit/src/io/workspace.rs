//! Task workspace creation and on-disk discovery.
//!
//! Every task gets a fresh directory named `{slug}_{timestamp}_{suffix}`. A
//! project root is any directory under it holding the configured manifest.

use std::cmp::Reverse;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use serde_json::Value;
use tracing::{debug, instrument};
use walkdir::{DirEntry, WalkDir};

use crate::core::path::display_relative;

/// Dependency, VCS, and build output directories never worth scanning.
pub const SKIP_DIRS: [&str; 8] = [
    "node_modules",
    ".git",
    "dist",
    ".angular",
    "__pycache__",
    ".vscode",
    "target",
    ".cache",
];

const MAX_NAME_ATTEMPTS: usize = 5;

/// Create a fresh, uniquely named workspace under `root` and return its
/// canonical path.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn create_task_workspace(root: &Path, goal: &str) -> Result<PathBuf> {
    fs::create_dir_all(root).with_context(|| format!("create workspace root {}", root.display()))?;
    let slug = slugify(goal);
    for _ in 0..MAX_NAME_ATTEMPTS {
        let name = build_workspace_name(&slug, &generate_timestamp(), &generate_short_id());
        let path = root.join(&name);
        match fs::create_dir(&path) {
            Ok(()) => {
                let canonical = path
                    .canonicalize()
                    .with_context(|| format!("canonicalize {}", path.display()))?;
                debug!(workspace = %canonical.display(), "created task workspace");
                return Ok(canonical);
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => {
                return Err(err).with_context(|| format!("create workspace {}", path.display()));
            }
        }
    }
    bail!(
        "could not allocate a unique workspace under {} after {MAX_NAME_ATTEMPTS} attempts",
        root.display()
    )
}

pub fn build_workspace_name(slug: &str, timestamp: &str, short_id: &str) -> String {
    format!("{slug}_{timestamp}_{short_id}")
}

/// Lowercase ASCII slug of at most 40 characters; `task` when nothing survives.
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
        if slug.len() >= 40 {
            break;
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() { "task".to_string() } else { slug }
}

fn generate_timestamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

fn generate_short_id() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase()
}

fn is_skipped(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIP_DIRS.contains(&name))
}

/// Directory holding the most recently modified `marker` under `workspace`.
///
/// Equal modification times resolve to the lexicographically smallest path.
#[instrument(skip_all, fields(marker))]
pub fn find_project_root(workspace: &Path, marker: &str) -> Result<Option<PathBuf>> {
    let mut best: Option<(SystemTime, Reverse<PathBuf>)> = None;
    for entry in WalkDir::new(workspace)
        .into_iter()
        .filter_entry(|e| !is_skipped(e))
    {
        let entry = entry.with_context(|| format!("scan {}", workspace.display()))?;
        if !entry.file_type().is_file() || entry.file_name() != marker {
            continue;
        }
        let modified = entry
            .metadata()
            .with_context(|| format!("stat {}", entry.path().display()))?
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let candidate = (modified, Reverse(entry.path().to_path_buf()));
        if best.as_ref().is_none_or(|current| candidate > *current) {
            best = Some(candidate);
        }
    }
    let root = best.and_then(|(_, Reverse(path))| path.parent().map(Path::to_path_buf));
    debug!(project_root = ?root, "manifest scan finished");
    Ok(root)
}

/// Files under `root` as sorted forward-slash relative paths, at most `limit`.
pub fn snapshot_files(root: &Path, limit: usize) -> Result<Vec<String>> {
    let mut files = Vec::new();
    if !root.is_dir() {
        return Ok(files);
    }
    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped(e))
    {
        let entry = entry.with_context(|| format!("scan {}", root.display()))?;
        if entry.file_type().is_file() {
            files.push(display_relative(root, entry.path()));
            if files.len() >= limit {
                break;
            }
        }
    }
    files.sort();
    Ok(files)
}

/// True when the project's manifest declares `target`.
///
/// Looks at `projects.*.architect.<target>` and `projects.*.targets.<target>`
/// in the marker file, then `scripts.<target>` in `package.json`.
pub fn manifest_has_target(project_root: &Path, marker: &str, target: &str) -> bool {
    let has_project_target = read_json(&project_root.join(marker))
        .as_ref()
        .and_then(|manifest| manifest.get("projects"))
        .and_then(Value::as_object)
        .is_some_and(|projects| {
            projects.values().any(|project| {
                ["architect", "targets"]
                    .iter()
                    .any(|key| project.get(key).and_then(|t| t.get(target)).is_some())
            })
        });
    if has_project_target {
        return true;
    }
    read_json(&project_root.join("package.json"))
        .as_ref()
        .and_then(|pkg| pkg.get("scripts"))
        .and_then(|scripts| scripts.get(target))
        .is_some()
}

fn read_json(path: &Path) -> Option<Value> {
    let raw = fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}
