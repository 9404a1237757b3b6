use std::fs;
use std::path::Path;

use phasekit::cancel::CancelFlag;
use phasekit::error::{PlannerError, TaskCancelled, ValidationError};
use phasekit::io::quality::CheckRun;
use phasekit::orchestrator::{Orchestrator, TaskResult};
use phasekit::test_support::{
    ScriptedOracle, ScriptedQualityRunner, actions_json, check_fail, check_pass, command_action,
    llm_action, plan_json, test_config, write_action,
};
use serde_json::json;

const BUILD: &str = "npx ng build --configuration production";
const UNIT: &str = "npx ng test --no-watch --browsers=ChromeHeadless";
const MANIFEST: &str = r#"{"projects":{"app":{"architect":{"build":{}}}}}"#;

fn run(
    temp: &Path,
    responses: Vec<String>,
    runs: Vec<CheckRun>,
    goal: &str,
) -> (anyhow::Result<TaskResult>, Vec<String>, Vec<String>) {
    let oracle = ScriptedOracle::new(responses);
    let quality = ScriptedQualityRunner::new(runs);
    let orchestrator = Orchestrator::new(&oracle, &quality, test_config(temp));
    let result = orchestrator.run_task(goal);
    (result, oracle.prompts(), quality.calls())
}

/// Text between `open` and `close`, empty when the section is absent.
fn section<'a>(prompt: &'a str, open: &str, close: &str) -> &'a str {
    prompt
        .split_once(open)
        .and_then(|(_, rest)| rest.split_once(close))
        .map_or("", |(body, _)| body)
}

fn scaffold_actions() -> String {
    actions_json(vec![
        write_action("app/angular.json", MANIFEST),
        write_action(
            "app/src/main.ts",
            "import { bootstrapApplication } from '@angular/platform-browser';\n",
        ),
    ])
}

#[test]
fn phases_run_in_dependency_order_and_gate_after_writes() {
    let temp = tempfile::tempdir().expect("tempdir");
    let responses = vec![
        plan_json(&[("Pages", &["Scaffold"]), ("Scaffold", &[])]),
        actions_json(vec![write_action("shop/angular.json", MANIFEST)]),
        actions_json(vec![write_action(
            "src/app/home.component.ts",
            "export class HomeComponent {}\n",
        )]),
    ];
    let (result, prompts, calls) = run(temp.path(), responses, Vec::new(), "storefront");
    let result = result.expect("task");

    assert!(result.ok);
    assert_eq!(result.completed_phases, vec!["Scaffold", "Pages"]);
    assert_eq!(result.iterations, 2);
    assert_eq!(prompts.len(), 3);
    assert!(prompts[1].contains(r#"<phase name="Scaffold">"#));
    assert!(prompts[2].contains(r#"<phase name="Pages">"#));

    let root = result.project_root.clone().expect("project root");
    assert_eq!(root, result.task_workspace.join("shop"));
    assert!(root.join("src/app/home.component.ts").is_file());
    assert_eq!(
        result.phase_results[1].actions[0].path.as_deref(),
        Some("shop/src/app/home.component.ts")
    );
    assert!(prompts[2].contains(&format!("Project root: {}", root.display())));

    // Build and unit tests after each phase; lint and e2e have no targets.
    assert_eq!(calls, vec![BUILD, UNIT, BUILD, UNIT]);
}

#[test]
fn traversal_in_a_phase_batch_aborts_the_task() {
    let temp = tempfile::tempdir().expect("tempdir");
    let responses = vec![
        plan_json(&[("Scaffold", &[])]),
        actions_json(vec![write_action("../secret.txt", "leaked")]),
    ];
    let (result, _, calls) = run(temp.path(), responses, Vec::new(), "escape");
    let err = result.expect_err("validation error");

    let validation = err
        .downcast_ref::<ValidationError>()
        .expect("validation error");
    assert!(validation.message().contains("path traversal"));
    assert!(!temp.path().join("secret.txt").exists());
    assert!(calls.is_empty());
}

#[test]
fn identical_failures_stall_after_one_autofix_round() {
    let temp = tempfile::tempdir().expect("tempdir");
    let failure = "src/app.ts:1:1 - error TS2304: Cannot find name 'x'.";
    let responses = vec![
        plan_json(&[("Build", &[])]),
        scaffold_actions(),
        actions_json(vec![write_action("src/app.ts", "export const x = 1;\n")]),
    ];
    let runs = vec![
        check_fail(failure),
        check_pass(),
        check_fail(failure),
        check_pass(),
    ];
    let (result, prompts, calls) = run(temp.path(), responses, runs, "app");
    let result = result.expect("task");

    assert!(!result.ok);
    assert!(result.completed_phases.is_empty());
    let phase = &result.phase_results[0];
    assert!(!phase.ok);
    assert!(phase.stalled);
    assert_eq!(phase.quality_rounds.len(), 2);
    assert_eq!(phase.autofix_actions.len(), 1);
    assert_eq!(
        phase.quality_rounds[0].signature,
        phase.quality_rounds[1].signature
    );
    assert_eq!(calls.len(), 4);
    assert_eq!(result.iterations, 2);

    let fix = &prompts[2];
    assert!(fix.contains(r#"<phase name="Build (autofix)" mode="fix">"#));
    assert!(section(fix, "<failures>", "</failures>").contains("TS2304"));
    assert!(section(fix, "<forbidden>", "</forbidden>").contains(BUILD));
    let commands = section(fix, "<commands>", "</commands>");
    assert!(!commands.contains(BUILD));
    assert!(commands.contains("npm install"));
}

#[test]
fn autofix_prompts_accumulate_failures_across_rounds() {
    let temp = tempfile::tempdir().expect("tempdir");
    let responses = vec![
        plan_json(&[("Build", &[])]),
        scaffold_actions(),
        actions_json(vec![write_action("src/a.ts", "export const a = 1;\n")]),
        actions_json(vec![write_action("src/b.spec.ts", "export const b = 2;\n")]),
    ];
    let runs = vec![
        check_fail("error TS2304: Cannot find name 'a'."),
        check_pass(),
        check_pass(),
        check_fail("FAILED: AppComponent should render title"),
        check_pass(),
        check_pass(),
    ];
    let (result, prompts, _) = run(temp.path(), responses, runs, "app");
    let result = result.expect("task");

    assert!(result.ok);
    let phase = &result.phase_results[0];
    assert!(!phase.stalled);
    assert_eq!(phase.quality_rounds.len(), 3);
    assert!(phase.quality_rounds[2].ok);
    assert_eq!(result.completed_phases, vec!["Build"]);

    let first = section(&prompts[2], "<accumulated>", "</accumulated>");
    assert_eq!(first.matches("• ").count(), 1);
    assert!(first.contains(BUILD));

    let second = section(&prompts[3], "<accumulated>", "</accumulated>");
    assert_eq!(second.matches("• ").count(), 2);
    assert!(second.contains(BUILD) && second.contains(UNIT));
    let forbidden = section(&prompts[3], "<forbidden>", "</forbidden>");
    assert!(forbidden.contains(BUILD) && forbidden.contains(UNIT));
    let failing_now = section(&prompts[3], "<failures>", "</failures>");
    assert!(failing_now.contains(UNIT) && !failing_now.contains(BUILD));
}

#[test]
fn autofix_gives_up_after_the_round_limit() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut responses = vec![plan_json(&[("Build", &[])]), scaffold_actions()];
    for n in 0..3 {
        responses.push(actions_json(vec![write_action(
            &format!("src/fix{n}.ts"),
            "export const fixed = true;\n",
        )]));
    }
    let runs = (0..4)
        .flat_map(|n| [check_fail(&format!("error TS100{n}: broken {n}")), check_pass()])
        .collect();
    let (result, prompts, _) = run(temp.path(), responses, runs, "app");
    let result = result.expect("task");

    let phase = &result.phase_results[0];
    assert!(!result.ok);
    assert!(!phase.stalled);
    assert_eq!(phase.quality_rounds.len(), 4);
    assert_eq!(phase.autofix_actions.len(), 3);
    assert_eq!(result.iterations, 4);
    assert_eq!(prompts.len(), 5);
}

#[test]
fn phases_without_a_manifest_skip_the_gate() {
    let temp = tempfile::tempdir().expect("tempdir");
    let responses = vec![
        plan_json(&[("Notes", &[])]),
        actions_json(vec![
            write_action("src/app.ts", "export const ready = true;\n"),
            command_action("echo done"),
        ]),
    ];
    let (result, _, calls) = run(temp.path(), responses, Vec::new(), "notes");
    let result = result.expect("task");

    assert!(result.ok);
    assert!(result.project_root.is_none());
    assert!(result.phase_results[0].quality_rounds.is_empty());
    assert!(calls.is_empty());
}

#[test]
fn third_level_nested_actions_fail_the_outer_call() {
    let temp = tempfile::tempdir().expect("tempdir");
    let responses = vec![
        plan_json(&[("Deep", &[])]),
        actions_json(vec![llm_action("level one")]),
        actions_json(vec![llm_action("level two")]),
        actions_json(vec![llm_action("level three")]),
        actions_json(vec![write_action("deep.ts", "export const deep = 3;\n")]),
    ];
    let (result, _, calls) = run(temp.path(), responses, Vec::new(), "deep");
    let result = result.expect("task");

    assert!(!result.ok);
    let outer = &result.phase_results[0].actions[0];
    assert!(!outer.ok);
    assert_eq!(outer.nested_actions_executed, Some(1));
    let error = outer.error.as_deref().expect("error");
    assert!(error.contains("nested action failed"));
    assert!(error.contains("depth limit 2"));
    assert!(!result.task_workspace.join("deep.ts").exists());
    assert!(calls.is_empty());
}

#[test]
fn newest_manifest_becomes_the_project_root() {
    let temp = tempfile::tempdir().expect("tempdir");
    let responses = vec![
        plan_json(&[("Scaffold", &[]), ("Move", &["Scaffold"]), ("Check", &["Move"])]),
        actions_json(vec![write_action("old/angular.json", MANIFEST)]),
        actions_json(vec![command_action(
            "cd .. && mkdir -p fresh && cp old/angular.json fresh/angular.json",
        )]),
        actions_json(vec![command_action("echo checking")]),
    ];
    let (result, prompts, _) = run(temp.path(), responses, Vec::new(), "move");
    let result = result.expect("task");

    assert!(result.ok);
    let fresh = result.task_workspace.join("fresh");
    assert_eq!(result.project_root.as_deref(), Some(fresh.as_path()));
    assert!(prompts[3].contains(&format!("Project root: {}", fresh.display())));
}

#[test]
fn planner_exhaustion_is_a_planner_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let responses = vec!["not json", "still not json", "nope"]
        .into_iter()
        .map(str::to_string)
        .collect();
    let (result, prompts, _) = run(temp.path(), responses, Vec::new(), "anything");
    let err = result.expect_err("planner error");

    let planner = err.downcast_ref::<PlannerError>().expect("planner error");
    assert_eq!(planner.attempts, 3);
    assert_eq!(prompts.len(), 3);
}

#[test]
fn invalid_plan_gets_one_correction() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cyclic = plan_json(&[("A", &["B"]), ("B", &["A"])]);
    let responses = vec![json!({"phases": []}).to_string(), cyclic];
    let (result, prompts, _) = run(temp.path(), responses, Vec::new(), "cycle");
    let err = result.expect_err("planner error");

    let planner = err.downcast_ref::<PlannerError>().expect("planner error");
    assert_eq!(planner.attempts, 2);
    assert!(planner.reason.contains("master plan invalid after correction"));
    assert_eq!(prompts.len(), 2);
}

#[test]
fn cancelled_task_stops_before_the_first_phase() {
    let temp = tempfile::tempdir().expect("tempdir");
    let oracle = ScriptedOracle::new(vec![plan_json(&[("Scaffold", &[])])]);
    let quality = ScriptedQualityRunner::default();
    let cancel = CancelFlag::new();
    let orchestrator =
        Orchestrator::new(&oracle, &quality, test_config(temp.path())).with_cancel(cancel.clone());
    cancel.cancel();

    let err = orchestrator.run_task("stop").expect_err("cancelled");
    assert!(err.downcast_ref::<TaskCancelled>().is_some());
    assert_eq!(oracle.remaining(), 0);
    assert_eq!(oracle.prompts().len(), 1);
    assert_eq!(fs::read_dir(temp.path()).expect("read").count(), 1);
}
