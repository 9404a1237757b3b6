//! Error taxonomy for the orchestration core.
//!
//! Each type is carried through `anyhow::Error` and recovered by callers with
//! `downcast_ref` where the distinction matters (fatal vs per-action).

use thiserror::Error;

/// The oracle never yielded parseable structure after all repairs and retries,
/// or the master plan stayed invalid after its corrective re-prompt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("planner failed after {attempts} attempt(s): {reason}")]
pub struct PlannerError {
    pub attempts: u32,
    pub reason: String,
}

/// Structural, security, or content violation in a plan or action batch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("validation failed: {0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

/// A single action failed a sandbox or guard check.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("path escapes task workspace: {0}")]
    SandboxEscape(String),
    #[error("interactive command blocked: {0}")]
    InteractiveCommand(String),
    #[error("'{command}' requires a '{target}' target in the project manifest")]
    MissingTarget { command: String, target: String },
    #[error("nested actions exceed depth limit {limit}")]
    DepthExceeded { limit: u32 },
    #[error("nested action failed: {0}")]
    NestedFailure(String),
}

/// Runaway repetition detected; fatal to the whole task.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("loop guard tripped in phase {phase:?} at iteration {iteration}: {reason}")]
pub struct LoopGuardError {
    pub phase: Option<String>,
    pub iteration: u32,
    pub reason: String,
}

/// The caller tripped the cancellation flag.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("task cancelled")]
pub struct TaskCancelled;
