//! Agent configuration (TOML).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::loop_guard::LoopLimits;
use crate::core::types::CheckCategory;

pub const DEFAULT_CONFIG_PATH: &str = "phasekit.toml";

/// Agent configuration.
///
/// Intended to be edited by humans. Missing fields default to values that drive
/// an Angular workspace through the `ng` CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Directory under which one fresh task workspace is created per run.
    pub workspace_root: PathBuf,

    /// Timeout for commands issued by phase actions.
    pub command_timeout_secs: u64,

    /// Wall-clock bound for one oracle call.
    pub oracle_timeout_secs: u64,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Byte budget for rendered prompts.
    pub prompt_budget_bytes: usize,

    pub planner_max_attempts: u32,
    pub autofix_max_rounds: u32,

    pub limits: LimitsConfig,
    pub context: ContextConfig,
    pub oracle: OracleConfig,
    pub project: ProjectConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_iterations: u32,
    pub max_actions_per_phase: u32,
    pub max_phase_repetitions: u32,
    pub same_action_streak: usize,
    /// Top-level `llm_call` actions allowed in one phase batch.
    pub max_llm_calls_per_phase: usize,
    /// Consecutive file writes before the oracle is asked to insert a build step.
    pub max_consecutive_writes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let guard = LoopLimits::default();
        Self {
            max_iterations: guard.max_iterations,
            max_actions_per_phase: guard.max_actions_per_phase,
            max_phase_repetitions: guard.max_phase_repetitions,
            same_action_streak: guard.same_action_streak,
            max_llm_calls_per_phase: 3,
            max_consecutive_writes: 6,
        }
    }
}

impl LimitsConfig {
    pub fn loop_limits(&self) -> LoopLimits {
        LoopLimits {
            max_iterations: self.max_iterations,
            max_actions_per_phase: self.max_actions_per_phase,
            max_phase_repetitions: self.max_phase_repetitions,
            same_action_streak: self.same_action_streak,
        }
    }
}

/// Bounds for file excerpts injected into `llm_call` prompts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContextConfig {
    pub max_total_bytes: usize,
    pub max_file_bytes: usize,
    pub max_files: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_total_bytes: 12_000,
            max_file_bytes: 4_000,
            max_files: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OracleConfig {
    /// Command that receives the prompt on stdin and prints the completion.
    pub command: Vec<String>,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "codex".to_string(),
                "exec".to_string(),
                "--skip-git-repo-check".to_string(),
                "-".to_string(),
            ],
        }
    }
}

/// A command prefix that needs a named target in the project manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatedCommand {
    pub prefix: String,
    pub target: String,
}

/// One step of the quality gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QualityCheck {
    pub category: CheckCategory,
    pub command: String,
    pub timeout_secs: u64,
    /// Skip the check unless the manifest defines this target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_target: Option<String>,
}

/// Everything specific to the generated project's toolchain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProjectConfig {
    /// Manifest filename that marks a project root.
    pub marker: String,
    /// Files a healthy project is expected to have, relative to its root.
    pub expected_files: Vec<String>,
    pub valid_commands: Vec<String>,
    pub deprecated_commands: Vec<String>,
    /// Command prefixes that block on a TTY or never exit.
    pub interactive_commands: Vec<String>,
    /// Command fragments that scaffold a new project.
    pub create_patterns: Vec<String>,
    pub gated_commands: Vec<GatedCommand>,
    pub quality_checks: Vec<QualityCheck>,
    /// Label -> command; output becomes an environment fact.
    pub env_probes: BTreeMap<String, String>,
    /// Extra environment for every spawned command.
    pub env: BTreeMap<String, String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let pairs = |items: &[(&str, &str)]| {
            items
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>()
        };
        Self {
            marker: "angular.json".to_string(),
            expected_files: strings(&[
                "package.json",
                "angular.json",
                "tsconfig.json",
                "src/main.ts",
                "src/index.html",
                "src/styles.css",
            ]),
            valid_commands: strings(&[
                "npx -y @angular/cli@latest new <name> --defaults --skip-git",
                "npm install",
                "npx ng generate component <name>",
                "npx ng build --configuration production",
                "npx ng test --no-watch --browsers=ChromeHeadless",
            ]),
            deprecated_commands: strings(&["ng build --prod", "ng serve --open", "npm start"]),
            interactive_commands: strings(&[
                "ng serve",
                "npx ng serve",
                "npm start",
                "npm run start",
                "ng test --watch",
                "vim",
                "nano",
                "less",
                "top",
            ]),
            create_patterns: strings(&["ng new", "@angular/cli@latest new", "npm init", "npm create"]),
            gated_commands: vec![
                GatedCommand {
                    prefix: "ng lint".to_string(),
                    target: "lint".to_string(),
                },
                GatedCommand {
                    prefix: "ng e2e".to_string(),
                    target: "e2e".to_string(),
                },
            ],
            quality_checks: vec![
                QualityCheck {
                    category: CheckCategory::Build,
                    command: "npx ng build --configuration production".to_string(),
                    timeout_secs: 600,
                    requires_target: None,
                },
                QualityCheck {
                    category: CheckCategory::Lint,
                    command: "npx ng lint".to_string(),
                    timeout_secs: 300,
                    requires_target: Some("lint".to_string()),
                },
                QualityCheck {
                    category: CheckCategory::UnitTest,
                    command: "npx ng test --no-watch --browsers=ChromeHeadless".to_string(),
                    timeout_secs: 600,
                    requires_target: None,
                },
                QualityCheck {
                    category: CheckCategory::E2e,
                    command: "npx ng e2e".to_string(),
                    timeout_secs: 900,
                    requires_target: Some("e2e".to_string()),
                },
            ],
            env_probes: pairs(&[("node", "node --version"), ("npm", "npm --version")]),
            env: pairs(&[
                ("CI", "true"),
                ("NG_CLI_ANALYTICS", "false"),
                ("npm_config_yes", "true"),
            ]),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("workspaces"),
            command_timeout_secs: 10 * 60,
            oracle_timeout_secs: 5 * 60,
            output_limit_bytes: 200_000,
            prompt_budget_bytes: 48_000,
            planner_max_attempts: 3,
            autofix_max_rounds: 3,
            limits: LimitsConfig::default(),
            context: ContextConfig::default(),
            oracle: OracleConfig::default(),
            project: ProjectConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.command_timeout_secs == 0 {
            return Err(anyhow!("command_timeout_secs must be > 0"));
        }
        if self.oracle_timeout_secs == 0 {
            return Err(anyhow!("oracle_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.planner_max_attempts == 0 {
            return Err(anyhow!("planner_max_attempts must be > 0"));
        }
        if self.limits.max_iterations == 0
            || self.limits.max_actions_per_phase == 0
            || self.limits.max_phase_repetitions == 0
            || self.limits.same_action_streak < 2
        {
            return Err(anyhow!(
                "limits must be > 0 (same_action_streak must be >= 2)"
            ));
        }
        if self.context.max_total_bytes == 0 || self.context.max_file_bytes == 0 {
            return Err(anyhow!("context byte limits must be > 0"));
        }
        if self.oracle.command.is_empty() || self.oracle.command[0].trim().is_empty() {
            return Err(anyhow!("oracle.command must be a non-empty array"));
        }
        if self.project.marker.trim().is_empty() {
            return Err(anyhow!("project.marker must not be empty"));
        }
        for check in &self.project.quality_checks {
            if check.command.trim().is_empty() {
                return Err(anyhow!("project.quality_checks entries need a command"));
            }
            if check.timeout_secs == 0 {
                return Err(anyhow!(
                    "quality check '{}' needs timeout_secs > 0",
                    check.command
                ));
            }
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
