//! Action batch validation: closed type set, command screening, path rules,
//! and content checks.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::core::content::validate_content;
use crate::core::schema::{ACTIONS_SCHEMA, validate_schema};
use crate::core::types::Action;
use crate::error::ValidationError;

pub const ACTION_TYPES: [&str; 4] = ["command", "file_write", "file_modify", "llm_call"];

/// Filenames that may not be written at the top level of the workspace.
pub const PROTECTED_FILES: [&str; 4] = ["angular.json", "package.json", "main.ts", "index.html"];

static DANGEROUS_COMMANDS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"rm\s+-[a-z]*r[a-z]*f|rm\s+-[a-z]*f[a-z]*r",
        r"dd\s+if=",
        r"\bmkfs",
        r"\bshutdown\b",
        r"\breboot\b",
        r"\bformat\b",
        r"del\s+/f\s+/s\s+/q",
        r">\s*/dev/(sd|hd|nvme|disk)",
        r":\(\)\s*\{\s*:\|:&\s*\};:",
        r"(curl|wget)\s+[^\n|]*\|\s*(sudo\s+)?(ba|z)?sh\b",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("dangerous command regex"))
    .collect()
});

static DRIVE_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]:/").expect("drive prefix regex"));

/// Validate a raw `{"actions":[...]}` payload and return the typed actions.
pub fn validate_actions(payload: &Value) -> Result<Vec<Action>, ValidationError> {
    validate_schema(payload, ACTIONS_SCHEMA)?;
    let items = payload
        .get("actions")
        .and_then(Value::as_array)
        .ok_or_else(|| ValidationError::new("payload has no 'actions' array"))?;

    let mut actions = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let kind = item.get("type").and_then(Value::as_str).unwrap_or_default();
        if !ACTION_TYPES.contains(&kind) {
            return Err(ValidationError::new(format!(
                "action #{}: type '{kind}' is not allowed",
                idx + 1
            )));
        }
        let action: Action = serde_json::from_value(item.clone()).map_err(|err| {
            ValidationError::new(format!("action #{} ({kind}): {err}", idx + 1))
        })?;
        check_action(&action)
            .map_err(|err| ValidationError::new(format!("action #{}: {}", idx + 1, err.message())))?;
        actions.push(action);
    }
    Ok(actions)
}

/// Check one typed action.
pub fn check_action(action: &Action) -> Result<(), ValidationError> {
    match action {
        Action::Command { command } => check_command(command),
        Action::FileWrite { path, content } | Action::FileModify { path, content } => {
            check_path(path)?;
            validate_content(path, content)
        }
        Action::LlmCall { prompt } => {
            if prompt.trim().is_empty() {
                return Err(ValidationError::new("llm_call prompt is empty"));
            }
            Ok(())
        }
    }
}

/// Per-phase ceilings on batch size and on `llm_call` count.
pub fn check_batch_limits(
    actions: &[Action],
    max_actions: u32,
    max_llm_calls: usize,
) -> Result<(), ValidationError> {
    if actions.len() > max_actions as usize {
        return Err(ValidationError::new(format!(
            "phase batch has {} actions, limit is {max_actions}",
            actions.len()
        )));
    }
    let llm_calls = actions
        .iter()
        .filter(|a| matches!(a, Action::LlmCall { .. }))
        .count();
    if llm_calls > max_llm_calls {
        return Err(ValidationError::new(format!(
            "phase batch has {llm_calls} llm_call actions, limit is {max_llm_calls}"
        )));
    }
    Ok(())
}

/// Reject empty commands and anything matching a dangerous pattern.
pub fn check_command(command: &str) -> Result<(), ValidationError> {
    if command.trim().is_empty() {
        return Err(ValidationError::new("command is empty"));
    }
    let lower = command.to_lowercase();
    if DANGEROUS_COMMANDS.iter().any(|re| re.is_match(&lower)) {
        return Err(ValidationError::new(format!(
            "command blocked for safety: '{command}'"
        )));
    }
    Ok(())
}

/// Reject absolute, traversing, or protected top-level paths.
pub fn check_path(path: &str) -> Result<(), ValidationError> {
    let cleaned = path.trim().replace('\\', "/");
    if cleaned.is_empty() {
        return Err(ValidationError::new("file action has an empty path"));
    }
    if cleaned.starts_with('/') || DRIVE_PREFIX_RE.is_match(&cleaned) {
        return Err(ValidationError::new(format!(
            "absolute path not allowed: '{path}'"
        )));
    }
    if cleaned.split('/').any(|segment| segment == "..") {
        return Err(ValidationError::new(format!(
            "path traversal blocked: '{path}'"
        )));
    }
    let trimmed = cleaned.trim_start_matches("./");
    if !trimmed.contains('/') && PROTECTED_FILES.contains(&trimmed.to_lowercase().as_str()) {
        return Err(ValidationError::new(format!(
            "protected file blocked: '{path}'"
        )));
    }
    Ok(())
}
