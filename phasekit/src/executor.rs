//! Action executor.
//!
//! Dispatches each action to its handler inside the task sandbox, records it
//! on the [`AgentState`], and runs the loop guard after every action, nested
//! ones included. Handler errors become failed [`ActionResult`]s; only
//! [`LoopGuardError`] and [`TaskCancelled`] abort the batch.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelFlag;
use crate::core::actions::validate_actions;
use crate::core::command::{cd_targets, contains_tokens, find_interactive};
use crate::core::json_repair::parse_json_object;
use crate::core::loop_guard::{self, LoopLimits};
use crate::core::path::{display_relative, join_within, normalize_lexically};
use crate::core::sanitize::{sanitize_content, truncate_bytes};
use crate::core::state::AgentState;
use crate::core::types::{Action, ActionResult};
use crate::error::{ExecutorError, LoopGuardError, TaskCancelled};
use crate::io::config::AgentConfig;
use crate::io::context::collect_context;
use crate::io::oracle::Oracle;
use crate::io::process::{run_command_with_timeout, shell_command};
use crate::io::prompt::PromptBuilder;
use crate::io::workspace::{find_project_root, manifest_has_target};

/// Deepest level at which `llm_call` responses may still carry actions.
pub const MAX_NESTED_DEPTH: u32 = 2;

pub struct ActionExecutor<'a, O> {
    oracle: O,
    config: &'a AgentConfig,
    prompts: PromptBuilder,
    limits: LoopLimits,
    cancel: CancelFlag,
}

impl<'a, O: Oracle> ActionExecutor<'a, O> {
    pub fn new(oracle: O, config: &'a AgentConfig, cancel: CancelFlag) -> Self {
        Self {
            oracle,
            config,
            prompts: PromptBuilder::new(config.prompt_budget_bytes),
            limits: config.limits.loop_limits(),
            cancel,
        }
    }

    /// Run a phase batch in order. One result per action.
    #[instrument(skip_all, fields(phase = ?state.current_phase, actions = actions.len()))]
    pub fn execute_actions(
        &self,
        state: &mut AgentState,
        actions: &[Action],
    ) -> Result<Vec<ActionResult>> {
        self.execute_at_depth(state, actions, 0)
    }

    fn execute_at_depth(
        &self,
        state: &mut AgentState,
        actions: &[Action],
        depth: u32,
    ) -> Result<Vec<ActionResult>> {
        let mut results = Vec::with_capacity(actions.len());
        for action in actions {
            self.cancel.check()?;
            let result = match self.dispatch(state, action, depth) {
                Ok(result) => result,
                Err(err) if is_fatal(&err) => return Err(err),
                Err(err) => {
                    let message = format!("{err:#}");
                    warn!(kind = action.kind(), depth, error = %message, "action failed");
                    let mut result = ActionResult::failure(action.kind(), message);
                    result.path = action.path().map(str::to_string);
                    result
                }
            };
            debug!(kind = action.kind(), depth, ok = result.ok, "action finished");
            state.register_action(action, &result, depth > 0);
            loop_guard::check(state, &self.limits)?;
            results.push(result);
        }
        Ok(results)
    }

    fn dispatch(&self, state: &mut AgentState, action: &Action, depth: u32) -> Result<ActionResult> {
        match action {
            Action::Command { command } => self.run_command(state, command),
            Action::FileWrite { path, content } => self.write_file(state, path, content, false),
            Action::FileModify { path, content } => self.write_file(state, path, content, true),
            Action::LlmCall { prompt } => self.llm_call(state, prompt, depth),
        }
    }

    #[instrument(skip_all, fields(command = %command))]
    fn run_command(&self, state: &mut AgentState, command: &str) -> Result<ActionResult> {
        let project = &self.config.project;
        if let Some(pattern) = find_interactive(command, &project.interactive_commands) {
            return Err(ExecutorError::InteractiveCommand(format!(
                "'{command}' matches '{pattern}'"
            ))
            .into());
        }

        let cwd = state.command_dir().to_path_buf();
        for gate in &project.gated_commands {
            if !contains_tokens(command, &gate.prefix) {
                continue;
            }
            let root = state.project_root().unwrap_or(cwd.as_path());
            if !manifest_has_target(root, &project.marker, &gate.target) {
                return Err(ExecutorError::MissingTarget {
                    command: gate.prefix.clone(),
                    target: gate.target.clone(),
                }
                .into());
            }
        }

        info!(cwd = %cwd.display(), "running command");
        let output = run_command_with_timeout(
            shell_command(command, &cwd, &project.env),
            None,
            self.config.command_timeout(),
            self.config.output_limit_bytes,
        )
        .with_context(|| format!("run command '{command}'"))?;

        let mut result = ActionResult::success("command");
        result.ok = output.success();
        result.exit_code = output.exit_code();
        result.output = Some(output.combined("command"));
        if output.timed_out {
            result.error = Some(format!(
                "command timed out after {}s",
                self.config.command_timeout_secs
            ));
        } else if !result.ok {
            result.error = Some(format!("command exited with status {:?}", result.exit_code));
        }

        if result.ok {
            result.warning = follow_directories(state, &cwd, command);
            resync_project_root(state, &project.marker)?;
        }
        Ok(result)
    }

    #[instrument(skip_all, fields(path = %rel, modify))]
    fn write_file(
        &self,
        state: &AgentState,
        rel: &str,
        content: &str,
        modify: bool,
    ) -> Result<ActionResult> {
        let kind = if modify { "file_modify" } else { "file_write" };
        let workspace = state.task_workspace();
        let cleaned = rel.trim().replace('\\', "/");
        let target = join_within(workspace, state.file_base(), &cleaned)
            .ok_or_else(|| ExecutorError::SandboxEscape(rel.to_string()))?;

        let real_root = workspace
            .canonicalize()
            .with_context(|| format!("canonicalize {}", workspace.display()))?;
        if !resolves_inside(&real_root, &target) {
            return Err(ExecutorError::SandboxEscape(rel.to_string()).into());
        }
        let parent = target
            .parent()
            .ok_or_else(|| ExecutorError::SandboxEscape(rel.to_string()))?;
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        if !resolves_inside(&real_root, parent) {
            return Err(ExecutorError::SandboxEscape(rel.to_string()).into());
        }

        let body = sanitize_content(content);
        if body.trim().is_empty() {
            return Err(anyhow::anyhow!("content for '{rel}' is empty after cleanup"));
        }
        let existed = target.is_file();
        fs::write(&target, &body).with_context(|| format!("write {}", target.display()))?;
        info!(bytes = body.len(), existed, "file written");

        let mut result = ActionResult::success(kind);
        result.path = Some(display_relative(workspace, &target));
        if modify && !existed {
            result.warning = Some(format!("'{rel}' did not exist; created it"));
        }
        Ok(result)
    }

    #[instrument(skip_all, fields(depth))]
    fn llm_call(&self, state: &mut AgentState, prompt: &str, depth: u32) -> Result<ActionResult> {
        let root = state
            .project_root()
            .unwrap_or(state.task_workspace())
            .to_path_buf();
        let project = collect_context(&root, prompt, &self.config.context)?;
        let request = self.prompts.nested_call(prompt, &project)?;
        let response = self
            .oracle
            .complete(&request)
            .context("nested oracle call")?;

        let mut result = ActionResult::success("llm_call");
        result.context_files = project.paths();
        result.output = Some(truncate_bytes(&response, self.config.output_limit_bytes).to_string());

        let Some(payload) = parse_json_object(&response)
            .ok()
            .filter(|value| value.get("actions").is_some())
        else {
            return Ok(result);
        };
        if depth >= MAX_NESTED_DEPTH {
            return Err(ExecutorError::DepthExceeded {
                limit: MAX_NESTED_DEPTH,
            }
            .into());
        }
        let nested = validate_actions(&payload)?;
        info!(nested = nested.len(), "executing nested actions");
        let outcomes = self.execute_at_depth(state, &nested, depth + 1)?;
        result.nested_actions_executed = Some(outcomes.len());
        if let Some(failed) = outcomes.iter().find(|outcome| !outcome.ok) {
            let reason = failed.error.clone().unwrap_or_else(|| failed.kind.clone());
            result.ok = false;
            result.error = Some(ExecutorError::NestedFailure(reason).to_string());
        }
        Ok(result)
    }
}

fn is_fatal(err: &anyhow::Error) -> bool {
    err.downcast_ref::<LoopGuardError>().is_some() || err.downcast_ref::<TaskCancelled>().is_some()
}

/// The deepest existing ancestor of `path` (itself included) canonicalizes
/// under `real_root`, so symlinks cannot lead outside.
fn resolves_inside(real_root: &Path, path: &Path) -> bool {
    let mut probe = Some(path);
    while let Some(candidate) = probe {
        if let Ok(real) = candidate.canonicalize() {
            return real.starts_with(real_root);
        }
        probe = candidate.parent();
    }
    false
}

/// Apply the command's `cd` segments to the tracked working directory.
/// Returns a warning when the result is unusable.
fn follow_directories(state: &mut AgentState, cwd: &Path, command: &str) -> Option<String> {
    let targets = cd_targets(command);
    if targets.is_empty() {
        return None;
    }
    let mut dir = cwd.to_path_buf();
    for target in &targets {
        dir = dir.join(target);
    }
    let Some(dir) = normalize_lexically(&dir) else {
        return Some(format!("ignored directory change to '{}'", targets.join(" -> ")));
    };
    if !dir.is_dir() {
        return Some(format!("directory '{}' does not exist", dir.display()));
    }
    state.set_current_workdir(&dir).err().map(|err| err.to_string())
}

/// Point `project_root` at the freshest manifest under the workspace.
///
/// Returns true when the root changed.
pub fn resync_project_root(state: &mut AgentState, marker: &str) -> Result<bool> {
    let Some(root) = find_project_root(state.task_workspace(), marker)? else {
        return Ok(false);
    };
    if state.project_root() == Some(root.as_path()) {
        return Ok(false);
    }
    info!(project_root = %root.display(), "project manifest detected");
    state.set_project_root(&root)?;
    Ok(true)
}
