//! Shared deterministic types for the orchestration core.
//!
//! These types define the stable JSON contracts exchanged with the oracle and
//! reported back to callers. They carry no I/O and no hidden state.

use serde::{Deserialize, Deserializer, Serialize};

/// Ordered set of phases produced by the oracle for one goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub phases: Vec<Phase>,
}

/// A named unit of work with its dependency references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    pub description: String,
    /// Raw references as written by the oracle; resolved by the validator.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub depends_on: Vec<String>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// One atomic operation within a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Command { command: String },
    FileWrite { path: String, content: String },
    FileModify { path: String, content: String },
    LlmCall { prompt: String },
}

impl Action {
    /// Wire name of the variant (`command`, `file_write`, ...).
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Command { .. } => "command",
            Action::FileWrite { .. } => "file_write",
            Action::FileModify { .. } => "file_modify",
            Action::LlmCall { .. } => "llm_call",
        }
    }

    /// Target path for file actions.
    pub fn path(&self) -> Option<&str> {
        match self {
            Action::FileWrite { path, .. } | Action::FileModify { path, .. } => Some(path.as_str()),
            Action::Command { .. } | Action::LlmCall { .. } => None,
        }
    }

    pub fn is_file_action(&self) -> bool {
        self.path().is_some()
    }
}

/// Outcome of a single action. Always produced, even on failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub ok: bool,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested_actions_executed: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_files: Vec<String>,
}

impl ActionResult {
    pub fn success(kind: &str) -> Self {
        Self {
            ok: true,
            kind: kind.to_string(),
            ..Self::default()
        }
    }

    pub fn failure(kind: &str, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            kind: kind.to_string(),
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Kind of verification a quality check performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckCategory {
    Build,
    Lint,
    UnitTest,
    E2e,
}

/// Result of one quality-gate command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityCheckReport {
    pub command: String,
    pub category: CheckCategory,
    pub ok: bool,
    pub exit_code: Option<i32>,
    pub output: String,
    /// Short order-preserving digest of the first error-shaped output lines.
    pub error_signature: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_codes: Vec<String>,
    #[serde(default)]
    pub timed_out: bool,
}
