//! Planner: turns oracle completions into validated plans and action batches.
//!
//! Every request goes through [`Planner::ask_json`], which runs the repair
//! pipeline on each completion and re-prompts with the parse error until the
//! attempt budget runs out.

use anyhow::Result;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::core::actions::{check_batch_limits, validate_actions};
use crate::core::json_repair::parse_json_object;
use crate::core::plan::validate_plan;
use crate::core::types::{Action, Phase, Plan};
use crate::error::PlannerError;
use crate::io::oracle::Oracle;
use crate::io::prompt::{PhaseContext, PromptBuilder};

/// Corrective re-prompts allowed for an invalid master plan.
const PLAN_CORRECTIONS: u32 = 1;

#[derive(Debug, Clone)]
pub struct Planner<O> {
    oracle: O,
    prompts: PromptBuilder,
    max_attempts: u32,
}

impl<O: Oracle> Planner<O> {
    pub fn new(oracle: O, prompt_budget_bytes: usize, max_attempts: u32) -> Self {
        Self {
            oracle,
            prompts: PromptBuilder::new(prompt_budget_bytes),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Ask until a completion parses as a JSON object.
    ///
    /// Oracle failures use up an attempt like parse failures do. Exhaustion is
    /// a [`PlannerError`].
    #[instrument(skip_all, fields(max_attempts = self.max_attempts))]
    pub fn ask_json(&self, prompt: &str) -> Result<Value> {
        let mut last_error = String::from("no attempt made");
        for attempt in 1..=self.max_attempts {
            let request = if attempt == 1 {
                prompt.to_string()
            } else {
                retry_prompt(prompt, &last_error)
            };
            let completion = match self.oracle.complete(&request) {
                Ok(completion) => completion,
                Err(err) => {
                    warn!(attempt, error = %format!("{err:#}"), "oracle call failed");
                    last_error = format!("oracle call failed: {err:#}");
                    continue;
                }
            };
            match parse_json_object(&completion) {
                Ok(value) => {
                    info!(attempt, "parsed oracle response");
                    return Ok(value);
                }
                Err(err) => {
                    warn!(attempt, error = %err, "unparseable oracle response");
                    last_error = err;
                }
            }
        }
        Err(PlannerError {
            attempts: self.max_attempts,
            reason: last_error,
        }
        .into())
    }

    /// Request and validate the master plan, with one corrective re-prompt.
    #[instrument(skip_all)]
    pub fn get_master_plan(&self, goal: &str) -> Result<Plan> {
        let mut correction: Option<String> = None;
        for round in 0..=PLAN_CORRECTIONS {
            let prompt = self.prompts.master_plan(goal, correction.as_deref())?;
            let raw = self.ask_json(&prompt)?;
            match validate_plan(&raw) {
                Ok(plan) => {
                    info!(phases = plan.phases.len(), "master plan accepted");
                    return Ok(plan);
                }
                Err(err) => {
                    warn!(round, error = %err, "master plan rejected");
                    correction = Some(err.message().to_string());
                }
            }
        }
        Err(PlannerError {
            attempts: PLAN_CORRECTIONS + 1,
            reason: format!(
                "master plan invalid after correction: {}",
                correction.unwrap_or_default()
            ),
        }
        .into())
    }

    /// Request, validate, and bound the action batch for one phase.
    ///
    /// A batch that fails validation is returned as a `ValidationError`
    /// without re-prompting.
    #[instrument(skip_all, fields(phase = %phase.name, fix = ctx.fix))]
    pub fn get_phase_actions(&self, phase: &Phase, ctx: &PhaseContext) -> Result<Vec<Action>> {
        let prompt = self.prompts.phase_actions(phase, ctx)?;
        let raw = self.ask_json(&prompt)?;
        let actions = validate_actions(&raw)?;
        check_batch_limits(&actions, ctx.limits.max_actions, ctx.limits.max_llm_calls)?;
        info!(actions = actions.len(), "phase actions accepted");
        Ok(actions)
    }
}

fn retry_prompt(prompt: &str, error: &str) -> String {
    format!(
        "{prompt}\n\nYour previous response could not be used: {error}\n\
         Respond again with ONLY the JSON object, no markdown and no commentary."
    )
}
