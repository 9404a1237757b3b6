//! Prompt builders for the master plan, phase actions, and nested calls.
//!
//! Templates mark each block with `<!-- section:KEY required|droppable -->`.
//! After rendering, droppable blocks are removed in a fixed order until the
//! prompt fits the byte budget; the last block is truncated as a last resort.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::sanitize::{dedup_preserving_order, strip_ansi, truncate_bytes};
use crate::core::signature::error_lines;
use crate::core::types::{Phase, QualityCheckReport};
use crate::io::context::PromptContext;

const MASTER_PLAN_TEMPLATE: &str = include_str!("prompts/master_plan.md");
const PHASE_ACTIONS_TEMPLATE: &str = include_str!("prompts/phase_actions.md");
const NESTED_CALL_TEMPLATE: &str = include_str!("prompts/nested_call.md");

const EXCERPT_LINES: usize = 20;
const EXCERPT_BYTES: usize = 2_000;

/// Drop order when over budget; sections not listed are never dropped.
const DROP_ORDER: [&str; 5] = ["tree", "existing", "accumulated", "environment", "files"];

const TRUNCATION_NOTE: &str = "\n[truncated]";

/// Authoring limits shown to the oracle for one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhaseLimits {
    pub max_actions: u32,
    pub max_llm_calls: usize,
    pub max_consecutive_writes: usize,
}

/// Compact view of a failing quality check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureSummary {
    pub command: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub error_codes: Vec<String>,
    pub excerpt: String,
}

impl FailureSummary {
    pub fn from_report(report: &QualityCheckReport) -> Self {
        let mut lines = error_lines(&report.output);
        if lines.is_empty() {
            let cleaned = strip_ansi(&report.output);
            let tail: Vec<String> = cleaned
                .lines()
                .map(str::trim_end)
                .filter(|line| !line.trim().is_empty())
                .map(str::to_string)
                .collect();
            let start = tail.len().saturating_sub(EXCERPT_LINES);
            lines = tail[start..].to_vec();
        }
        lines.truncate(EXCERPT_LINES);
        let joined = lines.join("\n");
        Self {
            command: report.command.clone(),
            exit_code: report.exit_code,
            timed_out: report.timed_out,
            error_codes: report.error_codes.clone(),
            excerpt: truncate_bytes(&joined, EXCERPT_BYTES).to_string(),
        }
    }
}

/// Workspace paths as displayed to the oracle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PathFacts {
    pub task_workspace: String,
    pub project_root: Option<String>,
    pub current_workdir: String,
}

/// Everything the phase-actions prompt needs.
#[derive(Debug, Clone)]
pub struct PhaseContext {
    pub goal: String,
    /// Set for autofix rounds.
    pub fix: bool,
    pub marker: String,
    pub paths: PathFacts,
    pub environment: BTreeMap<String, String>,
    pub existing_files: Vec<String>,
    pub missing_files: Vec<String>,
    pub valid_commands: Vec<String>,
    pub deprecated_commands: Vec<String>,
    pub forbidden_commands: Vec<String>,
    pub limits: PhaseLimits,
    pub failing_checks: Vec<FailureSummary>,
    pub accumulated_failures: Vec<FailureSummary>,
}

struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_template("master_plan", MASTER_PLAN_TEMPLATE)
            .context("register master_plan template")?;
        env.add_template("phase_actions", PHASE_ACTIONS_TEMPLATE)
            .context("register phase_actions template")?;
        env.add_template("nested_call", NESTED_CALL_TEMPLATE)
            .context("register nested_call template")?;
        Ok(Self { env })
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let template = self.env.get_template(name)?;
        template
            .render(ctx)
            .with_context(|| format!("render {name} prompt"))
    }
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").expect("section regex")
    });

    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(markers.len());
    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

fn total_len(sections: &[ParsedSection]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            let dropped = sections.remove(idx);
            debug!(
                section = key,
                bytes_dropped = dropped.content.len(),
                "dropped section for budget"
            );
        }
    }

    let overflow = total_len(sections).saturating_sub(budget);
    if overflow == 0 {
        return;
    }
    let Some(last) = sections.last_mut() else {
        return;
    };
    let before_len = last.content.len();
    let allowed = before_len.saturating_sub(overflow);
    if allowed > TRUNCATION_NOTE.len() {
        let cut = truncate_bytes(&last.content, allowed - TRUNCATION_NOTE.len()).len();
        last.content.truncate(cut);
        last.content.push_str(TRUNCATION_NOTE);
    } else {
        let cut = truncate_bytes(&last.content, allowed).len();
        last.content.truncate(cut);
    }
    debug!(
        section = %last.key,
        before_len,
        after_len = last.content.len(),
        "truncated section for budget"
    );
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Renders prompts within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn master_plan(&self, goal: &str, correction: Option<&str>) -> Result<String> {
        let rendered = PromptEngine::new()?.render(
            "master_plan",
            context! {
                goal => goal.trim(),
                correction => correction.map(str::trim).filter(|s| !s.is_empty()),
            },
        )?;
        Ok(self.fit(&rendered))
    }

    /// Phase prompt. Lists are de-duplicated and forbidden commands are
    /// removed from the valid list.
    pub fn phase_actions(&self, phase: &Phase, ctx: &PhaseContext) -> Result<String> {
        let forbidden = dedup_preserving_order(&ctx.forbidden_commands);
        let valid: Vec<String> = dedup_preserving_order(&ctx.valid_commands)
            .into_iter()
            .filter(|cmd| !forbidden.contains(cmd))
            .collect();
        let rendered = PromptEngine::new()?.render(
            "phase_actions",
            context! {
                goal => ctx.goal.trim(),
                fix => ctx.fix,
                phase => phase,
                marker => &ctx.marker,
                paths => &ctx.paths,
                environment => &ctx.environment,
                existing_files => dedup_preserving_order(&ctx.existing_files),
                missing_files => dedup_preserving_order(&ctx.missing_files),
                valid_commands => valid,
                deprecated_commands => dedup_preserving_order(&ctx.deprecated_commands),
                forbidden_commands => forbidden,
                limits => ctx.limits,
                failing_checks => &ctx.failing_checks,
                accumulated_failures => &ctx.accumulated_failures,
            },
        )?;
        Ok(self.fit(&rendered))
    }

    pub fn nested_call(&self, prompt: &str, project: &PromptContext) -> Result<String> {
        let rendered = PromptEngine::new()?.render(
            "nested_call",
            context! {
                prompt => prompt.trim(),
                excerpts => &project.excerpts,
                tree => &project.tree,
            },
        )?;
        Ok(self.fit(&rendered))
    }

    fn fit(&self, rendered: &str) -> String {
        let mut sections = parse_sections(rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        render_sections(&sections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::CheckCategory;
    use crate::io::context::FileExcerpt;

    fn phase() -> Phase {
        Phase {
            name: "Scaffold".to_string(),
            description: "Create the Angular workspace".to_string(),
            depends_on: Vec::new(),
        }
    }

    fn report(command: &str, output: &str) -> QualityCheckReport {
        QualityCheckReport {
            command: command.to_string(),
            category: CheckCategory::Build,
            ok: false,
            exit_code: Some(1),
            output: output.to_string(),
            error_signature: "0000000000000000".to_string(),
            error_codes: vec!["TS2304".to_string()],
            timed_out: false,
        }
    }

    fn phase_context() -> PhaseContext {
        PhaseContext {
            goal: "Build a landing page".to_string(),
            fix: false,
            marker: "angular.json".to_string(),
            paths: PathFacts {
                task_workspace: "/ws".to_string(),
                project_root: None,
                current_workdir: "/ws".to_string(),
            },
            environment: BTreeMap::from([("node".to_string(), "v20.11.0".to_string())]),
            existing_files: vec!["src/main.ts".to_string(), "src/main.ts".to_string()],
            missing_files: vec!["src/styles.css".to_string()],
            valid_commands: vec![
                "npx ng build".to_string(),
                "npx ng lint".to_string(),
                "npx ng build".to_string(),
            ],
            deprecated_commands: vec!["ng build --prod".to_string()],
            forbidden_commands: vec!["npx ng lint".to_string()],
            limits: PhaseLimits {
                max_actions: 10,
                max_llm_calls: 3,
                max_consecutive_writes: 6,
            },
            failing_checks: Vec::new(),
            accumulated_failures: Vec::new(),
        }
    }

    #[test]
    fn master_plan_has_contract_goal_and_correction() {
        let builder = PromptBuilder::new(10_000);
        let plain = builder.master_plan("Build a CRM", None).expect("render");
        assert!(plain.contains("<contract>"));
        assert!(plain.contains("<goal>\nBuild a CRM\n</goal>"));
        assert!(!plain.contains("<correction>"));

        let corrected = builder
            .master_plan("Build a CRM", Some("dependency cycle: A -> B -> A"))
            .expect("render");
        assert!(corrected.contains("dependency cycle: A -> B -> A"));
    }

    #[test]
    fn phase_prompt_prunes_forbidden_and_dedups() {
        let prompt = PromptBuilder::new(20_000)
            .phase_actions(&phase(), &phase_context())
            .expect("render");
        let commands_start = prompt.find("<commands>").expect("commands");
        let commands_end = prompt.find("</commands>").expect("commands end");
        let commands = &prompt[commands_start..commands_end];
        assert_eq!(commands.matches("npx ng build").count(), 1);
        assert!(!commands.contains("npx ng lint"));
        assert!(prompt.contains("Do NOT use them"));
        assert_eq!(prompt.matches("• src/main.ts").count(), 1);
        assert!(prompt.contains("At most 10 actions"));
        assert!(prompt.contains("node: v20.11.0"));
        assert!(prompt.contains("not created yet"));
    }

    #[test]
    fn fix_prompt_lists_failing_checks_with_codes() {
        let mut ctx = phase_context();
        ctx.fix = true;
        ctx.failing_checks = vec![FailureSummary::from_report(&report(
            "npx ng build",
            "compiling\nsrc/app.ts:3:1 - error TS2304: Cannot find name 'x'.\ndone",
        ))];
        let prompt = PromptBuilder::new(20_000)
            .phase_actions(&phase(), &ctx)
            .expect("render");
        assert!(prompt.contains(r#"mode="fix""#));
        assert!(prompt.contains("npx ng build → exit 1"));
        assert!(prompt.contains("codes: TS2304"));
        assert!(prompt.contains("Cannot find name 'x'"));
        assert!(!prompt.contains("compiling"));
    }

    #[test]
    fn budget_drops_droppable_sections_in_order() {
        let mut ctx = phase_context();
        ctx.existing_files = (0..400).map(|i| format!("src/app/file_{i}.ts")).collect();
        ctx.accumulated_failures = vec![FailureSummary::from_report(&report("npx ng test", "boom"))];
        let prompt = PromptBuilder::new(2_500)
            .phase_actions(&phase(), &ctx)
            .expect("render");
        assert!(!prompt.contains("### Existing Files"));
        assert!(prompt.contains("### Output Contract"));
        assert!(prompt.contains("### Phase"));
        assert!(prompt.contains("### Commands"));
    }

    #[test]
    fn nested_prompt_embeds_excerpts_or_tree() {
        let builder = PromptBuilder::new(10_000);
        let with_files = PromptContext {
            excerpts: vec![FileExcerpt {
                path: "src/app/app.component.html".to_string(),
                content: "<main></main>".to_string(),
                truncated: false,
            }],
            tree: Vec::new(),
        };
        let prompt = builder.nested_call("check the html", &with_files).expect("render");
        assert!(prompt.contains("[file: src/app/app.component.html]"));
        assert!(!prompt.contains("### Project Tree"));

        let tree_only = PromptContext {
            excerpts: Vec::new(),
            tree: vec!["src/main.ts".to_string()],
        };
        let prompt = builder.nested_call("summarize", &tree_only).expect("render");
        assert!(prompt.contains("### Project Tree"));
        assert!(prompt.contains("src/main.ts"));
    }

    #[test]
    fn oversized_required_section_is_truncated() {
        let prompt = PromptBuilder::new(1_500)
            .master_plan(&"g".repeat(5_000), None)
            .expect("render");
        assert!(prompt.len() <= 1_500 + "\n\n".len());
        assert!(prompt.ends_with("[truncated]"));
    }
}
