//! Lexical path helpers for sandbox containment.
//!
//! Everything here works on path text only. Callers that touch disk add their
//! own canonicalization on top.

use std::path::{Component, Path, PathBuf};

/// Collapse `.` and `..` components without consulting the filesystem.
///
/// Returns `None` when a `..` would climb above the first component.
pub fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                out.pop();
                depth -= 1;
            }
            Component::Normal(name) => {
                out.push(name);
                depth += 1;
            }
        }
    }
    Some(out)
}

/// True when `path` normalizes to `root` or something beneath it.
pub fn is_within(root: &Path, path: &Path) -> bool {
    let Some(root) = normalize_lexically(root) else {
        return false;
    };
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    match normalize_lexically(&joined) {
        Some(normalized) => normalized.starts_with(&root),
        None => false,
    }
}

/// Resolve `relative` against `base`, rejecting anything that leaves `root`.
pub fn join_within(root: &Path, base: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    if relative.is_absolute() {
        return None;
    }
    let joined = normalize_lexically(&base.join(relative))?;
    let root = normalize_lexically(root)?;
    joined.starts_with(&root).then_some(joined)
}

/// Forward-slash rendering of `path` relative to `root`, for prompts and reports.
pub fn display_relative(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
