//! Scripted fakes and fixtures shared by unit and integration tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;

use anyhow::{Result, anyhow};
use serde_json::{Value, json};

use crate::io::config::AgentConfig;
use crate::io::oracle::Oracle;
use crate::io::quality::{CheckRun, QualityRequest, QualityRunner};

/// Oracle that replays canned completions in order and records every prompt.
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    responses: RefCell<VecDeque<String>>,
    prompts: RefCell<Vec<String>>,
    fail_with: Option<String>,
}

impl ScriptedOracle {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: RefCell::new(responses.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Every call fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.borrow().len()
    }
}

impl Oracle for ScriptedOracle {
    fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.borrow_mut().push(prompt.to_string());
        if let Some(message) = &self.fail_with {
            return Err(anyhow!("{message}"));
        }
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted oracle exhausted"))
    }
}

/// Quality runner that replays canned runs; passes once the script is empty.
#[derive(Debug, Default)]
pub struct ScriptedQualityRunner {
    runs: RefCell<VecDeque<CheckRun>>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedQualityRunner {
    pub fn new(runs: Vec<CheckRun>) -> Self {
        Self {
            runs: RefCell::new(runs.into()),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Commands run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl QualityRunner for ScriptedQualityRunner {
    fn run(&self, request: &QualityRequest) -> Result<CheckRun> {
        self.calls.borrow_mut().push(request.command.clone());
        Ok(self.runs.borrow_mut().pop_front().unwrap_or_else(check_pass))
    }
}

pub fn check_pass() -> CheckRun {
    CheckRun {
        exit_code: Some(0),
        output: "ok".to_string(),
        timed_out: false,
    }
}

pub fn check_fail(output: &str) -> CheckRun {
    CheckRun {
        exit_code: Some(1),
        output: output.to_string(),
        timed_out: false,
    }
}

/// Defaults with workspaces under `workspace_root`, no environment probes,
/// and short command timeouts.
pub fn test_config(workspace_root: &Path) -> AgentConfig {
    let mut config = AgentConfig {
        workspace_root: workspace_root.to_path_buf(),
        command_timeout_secs: 30,
        ..AgentConfig::default()
    };
    config.project.env_probes = BTreeMap::new();
    config
}

/// Write a minimal Angular manifest declaring `targets` under `dir`.
pub fn write_manifest(dir: &Path, targets: &[&str]) {
    let architect: serde_json::Map<String, Value> = targets
        .iter()
        .map(|target| (target.to_string(), json!({})))
        .collect();
    fs::create_dir_all(dir).expect("create project dir");
    fs::write(
        dir.join("angular.json"),
        json!({"projects": {"app": {"architect": architect}}}).to_string(),
    )
    .expect("write angular.json");
}

/// `{"phases": [...]}` from `(name, depends_on)` pairs.
pub fn plan_json(phases: &[(&str, &[&str])]) -> String {
    let phases: Vec<Value> = phases
        .iter()
        .map(|(name, deps)| {
            json!({
                "name": name,
                "description": format!("{name} work"),
                "depends_on": deps,
            })
        })
        .collect();
    json!({ "phases": phases }).to_string()
}

/// `{"actions": [...]}` from already-shaped action objects.
pub fn actions_json(actions: Vec<Value>) -> String {
    json!({ "actions": actions }).to_string()
}

pub fn write_action(path: &str, content: &str) -> Value {
    json!({"type": "file_write", "path": path, "content": content})
}

pub fn command_action(command: &str) -> Value {
    json!({"type": "command", "command": command})
}

pub fn llm_action(prompt: &str) -> Value {
    json!({"type": "llm_call", "prompt": prompt})
}
