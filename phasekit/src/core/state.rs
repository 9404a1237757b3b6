//! Per-task bookkeeping: phase pointers, action history, counters, and the
//! three workspace paths.
//!
//! `task_workspace` is fixed at construction. `current_workdir` and
//! `project_root` can only be set through methods that re-check containment,
//! so they always point inside the workspace.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::core::path::{is_within, normalize_lexically};
use crate::core::types::{Action, ActionResult};
use crate::error::ExecutorError;

/// One entry of the action log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionRecord {
    pub phase: Option<String>,
    pub action: Action,
    pub result: ActionResult,
    /// Produced by a nested oracle call rather than the phase batch itself.
    pub nested: bool,
}

#[derive(Debug, Clone)]
pub struct AgentState {
    pub current_phase: Option<String>,
    pub completed_phases: Vec<String>,
    pub action_history: Vec<ActionRecord>,
    pub iteration_count: u32,
    pub phase_action_count: u32,
    pub phase_repetition_count: BTreeMap<String, u32>,
    pub tool_usage_count: BTreeMap<String, u32>,
    task_workspace: PathBuf,
    current_workdir: Option<PathBuf>,
    project_root: Option<PathBuf>,
}

impl AgentState {
    /// `task_workspace` should already be absolute and canonical.
    pub fn new(task_workspace: PathBuf) -> Self {
        let task_workspace = normalize_lexically(&task_workspace).unwrap_or(task_workspace);
        Self {
            current_phase: None,
            completed_phases: Vec::new(),
            action_history: Vec::new(),
            iteration_count: 0,
            phase_action_count: 0,
            phase_repetition_count: BTreeMap::new(),
            tool_usage_count: BTreeMap::new(),
            current_workdir: Some(task_workspace.clone()),
            project_root: None,
            task_workspace,
        }
    }

    pub fn task_workspace(&self) -> &Path {
        &self.task_workspace
    }

    pub fn current_workdir(&self) -> Option<&Path> {
        self.current_workdir.as_deref()
    }

    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Enter a phase. Every entry counts as a repetition and resets the
    /// per-phase action counter.
    pub fn set_phase(&mut self, name: &str) {
        self.current_phase = Some(name.to_string());
        self.phase_action_count = 0;
        *self.phase_repetition_count.entry(name.to_string()).or_insert(0) += 1;
        debug!(
            phase = name,
            repetitions = self.phase_repetition_count[name],
            "entered phase"
        );
    }

    pub fn repetitions(&self, name: &str) -> u32 {
        self.phase_repetition_count.get(name).copied().unwrap_or(0)
    }

    /// Record a finished phase (once) and reset per-phase counters.
    pub fn complete_phase(&mut self, name: &str) {
        if !self.completed_phases.iter().any(|done| done == name) {
            self.completed_phases.push(name.to_string());
        }
        self.reset_phase();
    }

    pub fn reset_phase(&mut self) {
        self.phase_action_count = 0;
    }

    pub fn increment_iteration(&mut self) {
        self.iteration_count += 1;
    }

    /// Append to the history. Nested actions are logged but do not count toward
    /// `phase_action_count`.
    pub fn register_action(&mut self, action: &Action, result: &ActionResult, nested: bool) {
        self.action_history.push(ActionRecord {
            phase: self.current_phase.clone(),
            action: action.clone(),
            result: result.clone(),
            nested,
        });
        if !nested {
            self.phase_action_count += 1;
        }
        *self
            .tool_usage_count
            .entry(action.kind().to_string())
            .or_insert(0) += 1;
    }

    /// Paths written by file actions so far, in first-write order.
    pub fn written_paths(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for record in &self.action_history {
            if !record.result.ok {
                continue;
            }
            if let Some(path) = record.action.path()
                && !seen.iter().any(|p: &String| p == path)
            {
                seen.push(path.to_string());
            }
        }
        seen
    }

    /// Point `current_workdir` at `path` (absolute, or relative to the workspace).
    pub fn set_current_workdir(&mut self, path: &Path) -> Result<(), ExecutorError> {
        let resolved = self.contain(path)?;
        debug!(workdir = %resolved.display(), "current workdir updated");
        self.current_workdir = Some(resolved);
        Ok(())
    }

    /// Record a detected project root; the working directory follows it.
    pub fn set_project_root(&mut self, path: &Path) -> Result<(), ExecutorError> {
        let resolved = self.contain(path)?;
        debug!(project_root = %resolved.display(), "project root updated");
        self.current_workdir = Some(resolved.clone());
        self.project_root = Some(resolved);
        Ok(())
    }

    /// Directory file actions resolve against: project root, then workdir,
    /// then the workspace itself.
    pub fn file_base(&self) -> &Path {
        self.project_root
            .as_deref()
            .or(self.current_workdir.as_deref())
            .unwrap_or(&self.task_workspace)
    }

    /// Directory commands run in.
    pub fn command_dir(&self) -> &Path {
        match self.current_workdir.as_deref() {
            Some(dir) if is_within(&self.task_workspace, dir) => dir,
            _ => &self.task_workspace,
        }
    }

    fn contain(&self, path: &Path) -> Result<PathBuf, ExecutorError> {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.task_workspace.join(path)
        };
        match normalize_lexically(&joined) {
            Some(resolved) if resolved.starts_with(&self.task_workspace) => Ok(resolved),
            _ => Err(ExecutorError::SandboxEscape(path.display().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &str) -> Action {
        Action::FileWrite {
            path: path.to_string(),
            content: "export const x = 1;".to_string(),
        }
    }

    #[test]
    fn nested_actions_are_logged_but_not_counted() {
        let mut state = AgentState::new(PathBuf::from("/tmp/ws"));
        state.set_phase("Build");
        let call = Action::LlmCall {
            prompt: "p".to_string(),
        };
        for path in ["a.ts", "b.ts", "c.ts"] {
            state.register_action(&write(path), &ActionResult::success("file_write"), true);
        }
        state.register_action(&call, &ActionResult::success("llm_call"), false);
        assert_eq!(state.action_history.len(), 4);
        assert_eq!(state.phase_action_count, 1);
        assert_eq!(state.tool_usage_count["file_write"], 3);
    }

    #[test]
    fn set_phase_counts_every_entry_and_resets_actions() {
        let mut state = AgentState::new(PathBuf::from("/tmp/ws"));
        state.set_phase("A");
        state.register_action(&write("a.ts"), &ActionResult::success("file_write"), false);
        state.set_phase("A");
        assert_eq!(state.repetitions("A"), 2);
        assert_eq!(state.phase_action_count, 0);
        assert_eq!(state.repetitions("B"), 0);
    }

    #[test]
    fn complete_phase_is_an_ordered_set() {
        let mut state = AgentState::new(PathBuf::from("/tmp/ws"));
        state.complete_phase("A");
        state.complete_phase("B");
        state.complete_phase("A");
        assert_eq!(state.completed_phases, vec!["A", "B"]);
    }

    #[test]
    fn project_root_moves_workdir_and_stays_inside() {
        let mut state = AgentState::new(PathBuf::from("/tmp/ws"));
        state.set_project_root(Path::new("app")).expect("inside");
        assert_eq!(state.project_root(), Some(Path::new("/tmp/ws/app")));
        assert_eq!(state.current_workdir(), Some(Path::new("/tmp/ws/app")));
        assert_eq!(state.file_base(), Path::new("/tmp/ws/app"));

        let err = state
            .set_current_workdir(Path::new("/tmp/ws/../elsewhere"))
            .expect_err("escape");
        assert!(matches!(err, ExecutorError::SandboxEscape(_)));
        state
            .set_project_root(Path::new("/etc"))
            .expect_err("outside");
        assert_eq!(state.project_root(), Some(Path::new("/tmp/ws/app")));
    }

    #[test]
    fn written_paths_skips_failures_and_duplicates() {
        let mut state = AgentState::new(PathBuf::from("/tmp/ws"));
        state.register_action(&write("a.ts"), &ActionResult::success("file_write"), false);
        state.register_action(&write("b.ts"), &ActionResult::failure("file_write", "x"), false);
        state.register_action(&write("a.ts"), &ActionResult::success("file_write"), false);
        assert_eq!(state.written_paths(), vec!["a.ts"]);
    }
}
