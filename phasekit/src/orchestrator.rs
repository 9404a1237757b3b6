//! Task orchestration: plan, order, run each phase, gate, and autofix.
//!
//! One call to [`Orchestrator::run_task`] owns one fresh workspace and one
//! [`AgentState`]. Phases run in topological order; a phase that wrote code
//! or scaffolded a project is followed by the quality gate and, on failure,
//! by bounded autofix rounds that stop early when the failure repeats.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::cancel::CancelFlag;
use crate::core::command::is_create_command;
use crate::core::loop_guard;
use crate::core::order::topological_order;
use crate::core::plan::check_plan;
use crate::core::sanitize::dedup_preserving_order;
use crate::core::signature::round_signature;
use crate::core::state::AgentState;
use crate::core::types::{Action, ActionResult, Phase, Plan, QualityCheckReport};
use crate::executor::{ActionExecutor, resync_project_root};
use crate::io::config::AgentConfig;
use crate::io::oracle::Oracle;
use crate::io::process::{run_command_with_timeout, shell_command};
use crate::io::prompt::{FailureSummary, PathFacts, PhaseContext, PhaseLimits};
use crate::io::quality::{QualityRunner, run_quality_gate};
use crate::io::workspace::{create_task_workspace, snapshot_files};
use crate::planner::Planner;

const EXISTING_FILES_LIMIT: usize = 300;
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);
const PROBE_OUTPUT_LIMIT: usize = 4_096;

/// One run of the quality gate. Round 0 follows the phase itself; round N
/// follows autofix attempt N.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityRound {
    pub round: u32,
    pub ok: bool,
    pub signature: String,
    pub reports: Vec<QualityCheckReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseResult {
    pub name: String,
    pub ok: bool,
    pub actions: Vec<ActionResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub autofix_actions: Vec<ActionResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub quality_rounds: Vec<QualityRound>,
    /// Autofix ended because two consecutive rounds failed identically.
    pub stalled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskResult {
    pub ok: bool,
    pub plan: Plan,
    pub completed_phases: Vec<String>,
    pub iterations: u32,
    pub phase_results: Vec<PhaseResult>,
    pub task_workspace: PathBuf,
    pub project_root: Option<PathBuf>,
}

/// Failures and broken commands remembered across autofix rounds.
#[derive(Debug, Default)]
struct FixMemory {
    accumulated: Vec<FailureSummary>,
    forbidden: Vec<String>,
}

impl FixMemory {
    fn record(&mut self, failing: &[&QualityCheckReport]) {
        for report in failing {
            self.accumulated.push(FailureSummary::from_report(report));
            if !self.forbidden.contains(&report.command) {
                self.forbidden.push(report.command.clone());
            }
        }
    }
}

/// Per-task view shared by the phase helpers.
struct TaskScope<'t, O> {
    goal: &'t str,
    planner: Planner<&'t O>,
    executor: ActionExecutor<'t, &'t O>,
    environment: BTreeMap<String, String>,
    memory: FixMemory,
}

pub struct Orchestrator<O, Q> {
    oracle: O,
    quality: Q,
    config: AgentConfig,
    cancel: CancelFlag,
}

impl<O: Oracle, Q: QualityRunner> Orchestrator<O, Q> {
    pub fn new(oracle: O, quality: Q, config: AgentConfig) -> Self {
        Self {
            oracle,
            quality,
            config,
            cancel: CancelFlag::new(),
        }
    }

    /// Share `cancel` with the caller so it can stop the task between actions.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run one goal end to end.
    ///
    /// Planner, validation, loop-guard, and cancellation failures are returned
    /// as errors (downcast to tell them apart). A task that ran to the end but
    /// left a phase failing is `Ok` with `ok == false`.
    #[instrument(skip_all, fields(goal_bytes = goal.len()))]
    pub fn run_task(&self, goal: &str) -> Result<TaskResult> {
        let workspace = create_task_workspace(&self.config.workspace_root, goal)?;
        info!(workspace = %workspace.display(), "task workspace ready");
        let mut state = AgentState::new(workspace.clone());

        let planner = Planner::new(
            &self.oracle,
            self.config.prompt_budget_bytes,
            self.config.planner_max_attempts,
        );
        let plan = planner.get_master_plan(goal)?;
        let order = topological_order(&check_plan(&plan)?)?;
        info!(
            phases = plan.phases.len(),
            order = ?order.iter().map(|&i| plan.phases[i].name.as_str()).collect::<Vec<_>>(),
            "plan ordered"
        );

        let mut scope = TaskScope {
            goal,
            planner,
            executor: ActionExecutor::new(&self.oracle, &self.config, self.cancel.clone()),
            environment: self.probe_environment(&workspace),
            memory: FixMemory::default(),
        };

        let mut phase_results = Vec::with_capacity(order.len());
        let mut ok = true;
        for idx in order {
            self.cancel.check()?;
            let result = self.run_phase(&mut scope, &mut state, &plan.phases[idx])?;
            let phase_ok = result.ok;
            phase_results.push(result);
            if !phase_ok {
                warn!(phase = %plan.phases[idx].name, "phase failed, stopping");
                ok = false;
                break;
            }
        }

        info!(ok, iterations = state.iteration_count, "task finished");
        Ok(TaskResult {
            ok,
            completed_phases: state.completed_phases.clone(),
            iterations: state.iteration_count,
            phase_results,
            task_workspace: workspace,
            project_root: state.project_root().map(Path::to_path_buf),
            plan,
        })
    }

    #[instrument(skip_all, fields(phase = %phase.name))]
    fn run_phase(
        &self,
        scope: &mut TaskScope<'_, O>,
        state: &mut AgentState,
        phase: &Phase,
    ) -> Result<PhaseResult> {
        resync_project_root(state, &self.config.project.marker)?;
        self.enter(state, &phase.name)?;

        let ctx = self.phase_context(scope, state, false, Vec::new())?;
        let actions = scope.planner.get_phase_actions(phase, &ctx)?;
        let results = scope.executor.execute_actions(state, &actions)?;
        let actions_ok = results.iter().all(|r| r.ok);

        let mut outcome = PhaseResult {
            name: phase.name.clone(),
            ok: actions_ok,
            actions: results,
            autofix_actions: Vec::new(),
            quality_rounds: Vec::new(),
            stalled: false,
        };

        resync_project_root(state, &self.config.project.marker)?;
        if self.generated_code(state, &phase.name) {
            match state.project_root().map(Path::to_path_buf) {
                Some(root) => {
                    let gate_ok = self.quality_loop(scope, state, phase, &root, &mut outcome)?;
                    outcome.ok = gate_ok;
                }
                None => info!("no project manifest yet, skipping quality gate"),
            }
        }

        if outcome.ok {
            state.complete_phase(&phase.name);
        } else {
            state.reset_phase();
        }
        info!(ok = outcome.ok, "phase finished");
        Ok(outcome)
    }

    /// Gate, then autofix until green, out of rounds, or stalled. Returns
    /// whether the last gate passed.
    fn quality_loop(
        &self,
        scope: &mut TaskScope<'_, O>,
        state: &mut AgentState,
        phase: &Phase,
        project_root: &Path,
        outcome: &mut PhaseResult,
    ) -> Result<bool> {
        let mut reports = self.gate(project_root)?;
        let mut signature = round_signature(&reports);
        outcome.quality_rounds.push(round(0, &reports, &signature));

        let fix_phase = Phase {
            name: format!("{} (autofix)", phase.name),
            description: format!(
                "Fix the failing quality checks left by phase '{}': {}",
                phase.name, phase.description
            ),
            depends_on: Vec::new(),
        };

        let mut attempt = 0;
        while !passed(&reports) && attempt < self.config.autofix_max_rounds {
            attempt += 1;
            let failing: Vec<&QualityCheckReport> = reports.iter().filter(|r| !r.ok).collect();
            scope.memory.record(&failing);
            let failing_now = failing.iter().map(|r| FailureSummary::from_report(r)).collect();
            info!(attempt, failing = failing.len(), "starting autofix round");

            self.enter(state, &fix_phase.name)?;
            let ctx = self.phase_context(scope, state, true, failing_now)?;
            let actions = scope.planner.get_phase_actions(&fix_phase, &ctx)?;
            let results = scope.executor.execute_actions(state, &actions)?;
            outcome.autofix_actions.extend(results);

            resync_project_root(state, &self.config.project.marker)?;
            let root = state
                .project_root()
                .map_or_else(|| project_root.to_path_buf(), Path::to_path_buf);
            reports = self.gate(&root)?;
            let next = round_signature(&reports);
            outcome.quality_rounds.push(round(attempt, &reports, &next));
            if !passed(&reports) && next == signature {
                warn!(attempt, signature = %next, "autofix stalled on identical failures");
                outcome.stalled = true;
                break;
            }
            signature = next;
        }
        Ok(passed(&reports))
    }

    fn gate(&self, project_root: &Path) -> Result<Vec<QualityCheckReport>> {
        run_quality_gate(
            &self.quality,
            &self.config.project.quality_checks,
            project_root,
            &self.config.project.marker,
            &self.cancel,
        )
    }

    /// Start a phase attempt: counts toward repetitions and iterations.
    fn enter(&self, state: &mut AgentState, name: &str) -> Result<()> {
        state.set_phase(name);
        state.increment_iteration();
        loop_guard::check(state, &self.config.limits.loop_limits())?;
        Ok(())
    }

    /// Successful file writes or project scaffolding in this phase.
    fn generated_code(&self, state: &AgentState, phase: &str) -> bool {
        let patterns = &self.config.project.create_patterns;
        state
            .action_history
            .iter()
            .filter(|record| record.result.ok && record.phase.as_deref() == Some(phase))
            .any(|record| match &record.action {
                Action::FileWrite { .. } | Action::FileModify { .. } => true,
                Action::Command { command } => is_create_command(command, patterns),
                Action::LlmCall { .. } => false,
            })
    }

    fn phase_context(
        &self,
        scope: &TaskScope<'_, O>,
        state: &AgentState,
        fix: bool,
        failing_checks: Vec<FailureSummary>,
    ) -> Result<PhaseContext> {
        let project = &self.config.project;
        let base = state.project_root().unwrap_or(state.task_workspace());
        let existing_files = snapshot_files(base, EXISTING_FILES_LIMIT)?;

        let mut expected = project.expected_files.clone();
        expected.extend(state.written_paths());
        let missing_files = dedup_preserving_order(&expected)
            .into_iter()
            .filter(|path| !base.join(path).exists())
            .collect();

        let display = |path: &Path| path.display().to_string();
        Ok(PhaseContext {
            goal: scope.goal.to_string(),
            fix,
            marker: project.marker.clone(),
            paths: PathFacts {
                task_workspace: display(state.task_workspace()),
                project_root: state.project_root().map(display),
                current_workdir: display(state.command_dir()),
            },
            environment: scope.environment.clone(),
            existing_files,
            missing_files,
            valid_commands: project.valid_commands.clone(),
            deprecated_commands: project.deprecated_commands.clone(),
            forbidden_commands: scope.memory.forbidden.clone(),
            limits: PhaseLimits {
                max_actions: self.config.limits.max_actions_per_phase,
                max_llm_calls: self.config.limits.max_llm_calls_per_phase,
                max_consecutive_writes: self.config.limits.max_consecutive_writes,
            },
            failing_checks,
            accumulated_failures: scope.memory.accumulated.clone(),
        })
    }

    /// OS facts plus one line per configured probe; `unavailable` on failure.
    fn probe_environment(&self, workspace: &Path) -> BTreeMap<String, String> {
        let mut facts = BTreeMap::from([
            ("os".to_string(), std::env::consts::OS.to_string()),
            ("arch".to_string(), std::env::consts::ARCH.to_string()),
        ]);
        for (label, command) in &self.config.project.env_probes {
            let value = run_command_with_timeout(
                shell_command(command, workspace, &self.config.project.env),
                None,
                PROBE_TIMEOUT,
                PROBE_OUTPUT_LIMIT,
            )
            .ok()
            .filter(|output| output.success())
            .and_then(|output| {
                String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .map(str::trim)
                    .find(|line| !line.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "unavailable".to_string());
            facts.insert(label.clone(), value);
        }
        facts
    }
}

fn passed(reports: &[QualityCheckReport]) -> bool {
    reports.iter().all(|r| r.ok)
}

fn round(index: u32, reports: &[QualityCheckReport], signature: &str) -> QualityRound {
    QualityRound {
        round: index,
        ok: passed(reports),
        signature: signature.to_string(),
        reports: reports.to_vec(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedOracle, ScriptedQualityRunner, test_config};

    #[test]
    fn failing_probes_report_unavailable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = test_config(temp.path());
        config.project.env_probes = BTreeMap::from([
            ("missing".to_string(), "exit 1".to_string()),
            ("shell".to_string(), "echo '  v1.2.3  '; echo extra".to_string()),
        ]);
        let orchestrator = Orchestrator::new(
            ScriptedOracle::default(),
            ScriptedQualityRunner::default(),
            config,
        );

        let facts = orchestrator.probe_environment(temp.path());

        assert_eq!(facts["missing"], "unavailable");
        assert_eq!(facts["shell"], "v1.2.3");
        assert_eq!(facts["os"], std::env::consts::OS);
    }
}
