//! Plan validation: required fields, unique names, dependency resolution, and
//! cycle detection.
//!
//! A dependency reference resolves, in order, by exact name, by
//! case/whitespace-normalized name, or by a short prefix alias such as
//! `Phase 1` for a phase named `Phase 1: Setup`. Every reference must resolve
//! to exactly one phase.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::core::schema::{PLAN_SCHEMA, validate_schema};
use crate::core::types::Plan;
use crate::error::ValidationError;

static SHORT_ALIAS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\p{L}+)\s*#?\s*(\d+)\b").expect("short alias regex")
});

/// Resolved dependency edges, indexed by position in the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    /// `deps[i]` lists the plan indices phase `i` depends on (deduplicated, sorted).
    pub deps: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }
}

/// Validate a raw plan payload and return the typed plan.
pub fn validate_plan(raw: &Value) -> Result<Plan, ValidationError> {
    validate_schema(raw, PLAN_SCHEMA)?;
    let plan: Plan = serde_json::from_value(raw.clone())
        .map_err(|err| ValidationError::new(format!("plan does not match contract: {err}")))?;
    check_plan(&plan)?;
    Ok(plan)
}

/// Semantic checks on an already-typed plan; returns the resolved graph.
pub fn check_plan(plan: &Plan) -> Result<DependencyGraph, ValidationError> {
    if plan.phases.is_empty() {
        return Err(ValidationError::new("plan contains no phases"));
    }
    let graph = resolve_dependencies(plan)?;
    assert_acyclic(plan, &graph)?;
    Ok(graph)
}

/// Lowercase and collapse whitespace.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Short `word N` prefix of a phase name (`"Phase 1: Setup"` -> `"phase 1"`).
pub fn short_alias(name: &str) -> Option<String> {
    let caps = SHORT_ALIAS_RE.captures(name)?;
    Some(format!("{} {}", caps[1].to_lowercase(), &caps[2]))
}

/// Resolve every `depends_on` reference to a plan index.
pub fn resolve_dependencies(plan: &Plan) -> Result<DependencyGraph, ValidationError> {
    let mut exact: HashMap<&str, usize> = HashMap::new();
    let mut normalized: HashMap<String, usize> = HashMap::new();
    let mut aliases: BTreeMap<String, Vec<usize>> = BTreeMap::new();

    for (idx, phase) in plan.phases.iter().enumerate() {
        if phase.name.trim().is_empty() {
            return Err(ValidationError::new(format!("phase #{} has an empty name", idx + 1)));
        }
        if exact.insert(phase.name.as_str(), idx).is_some() {
            return Err(ValidationError::new(format!(
                "duplicate phase name '{}'",
                phase.name
            )));
        }
        let key = normalize_name(&phase.name);
        if let Some(prev) = normalized.insert(key, idx) {
            return Err(ValidationError::new(format!(
                "phase names '{}' and '{}' collide after normalization",
                plan.phases[prev].name, phase.name
            )));
        }
        if let Some(alias) = short_alias(&phase.name) {
            aliases.entry(alias).or_default().push(idx);
        }
    }

    let mut deps = Vec::with_capacity(plan.phases.len());
    for phase in &plan.phases {
        let mut resolved = Vec::new();
        for reference in &phase.depends_on {
            let idx = resolve_reference(reference, &exact, &normalized, &aliases).map_err(
                |reason| {
                    ValidationError::new(format!(
                        "phase '{}' depends on '{}': {reason}",
                        phase.name, reference
                    ))
                },
            )?;
            resolved.push(idx);
        }
        resolved.sort_unstable();
        resolved.dedup();
        deps.push(resolved);
    }
    Ok(DependencyGraph { deps })
}

fn resolve_reference(
    reference: &str,
    exact: &HashMap<&str, usize>,
    normalized: &HashMap<String, usize>,
    aliases: &BTreeMap<String, Vec<usize>>,
) -> Result<usize, String> {
    if let Some(idx) = exact.get(reference) {
        return Ok(*idx);
    }
    let key = normalize_name(reference);
    if key.is_empty() {
        return Err("empty reference".to_string());
    }
    if let Some(idx) = normalized.get(&key) {
        return Ok(*idx);
    }
    let alias = short_alias(reference).unwrap_or(key);
    match aliases.get(&alias).map(Vec::as_slice) {
        Some([idx]) => Ok(*idx),
        Some(many) if many.len() > 1 => Err(format!(
            "ambiguous reference matches {} phases",
            many.len()
        )),
        _ => Err("unknown phase".to_string()),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// Depth-first search; any back-edge is a cycle.
pub fn assert_acyclic(plan: &Plan, graph: &DependencyGraph) -> Result<(), ValidationError> {
    let mut marks = vec![Mark::Unvisited; graph.len()];
    let mut stack = Vec::new();
    for start in 0..graph.len() {
        visit(start, graph, &mut marks, &mut stack).map_err(|cycle| {
            let names: Vec<&str> = cycle
                .iter()
                .map(|idx| plan.phases[*idx].name.as_str())
                .collect();
            ValidationError::new(format!("dependency cycle: {}", names.join(" -> ")))
        })?;
    }
    Ok(())
}

fn visit(
    node: usize,
    graph: &DependencyGraph,
    marks: &mut [Mark],
    stack: &mut Vec<usize>,
) -> Result<(), Vec<usize>> {
    match marks[node] {
        Mark::Done => return Ok(()),
        Mark::Visiting => {
            let start = stack.iter().position(|idx| *idx == node).unwrap_or(0);
            let mut cycle = stack[start..].to_vec();
            cycle.push(node);
            return Err(cycle);
        }
        Mark::Unvisited => {}
    }
    marks[node] = Mark::Visiting;
    stack.push(node);
    for dep in &graph.deps[node] {
        visit(*dep, graph, marks, stack)?;
    }
    stack.pop();
    marks[node] = Mark::Done;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Phase;
    use serde_json::json;

    fn plan(phases: &[(&str, &[&str])]) -> Plan {
        Plan {
            phases: phases
                .iter()
                .map(|(name, deps)| Phase {
                    name: name.to_string(),
                    description: format!("{name} work"),
                    depends_on: deps.iter().map(|d| d.to_string()).collect(),
                })
                .collect(),
        }
    }

    #[test]
    fn forward_references_to_exact_names_validate() {
        let p = plan(&[("A", &[]), ("B", &["A"]), ("C", &["A", "B"])]);
        let graph = check_plan(&p).expect("valid");
        assert_eq!(graph.deps, vec![vec![], vec![0], vec![0, 1]]);
    }

    #[test]
    fn short_prefix_alias_resolves() {
        let p = plan(&[
            ("Phase 1: Planning and design", &[]),
            ("Phase 2: Setup", &["Phase 1"]),
            ("Phase 3: Build", &["phase   2"]),
        ]);
        let graph = check_plan(&p).expect("valid");
        assert_eq!(graph.deps[1], vec![0]);
        assert_eq!(graph.deps[2], vec![1]);
    }

    #[test]
    fn normalized_reference_resolves() {
        let p = plan(&[("Scaffold App", &[]), ("Write Tests", &["  scaffold   app "])]);
        check_plan(&p).expect("valid");
    }

    #[test]
    fn phase_10_does_not_satisfy_phase_1() {
        let p = plan(&[("Phase 10: Deploy", &[]), ("Phase 11: Verify", &["Phase 1"])]);
        let err = check_plan(&p).expect_err("unknown");
        assert!(err.message().contains("unknown phase"));
    }

    #[test]
    fn ambiguous_alias_is_rejected() {
        let p = plan(&[
            ("Phase 1: Backend", &[]),
            ("Phase 1: Frontend", &[]),
            ("Phase 2", &["Phase 1"]),
        ]);
        let err = check_plan(&p).expect_err("ambiguous");
        assert!(err.message().contains("ambiguous"));
    }

    #[test]
    fn duplicate_and_normalized_collisions_are_rejected() {
        let err = check_plan(&plan(&[("A", &[]), ("A", &[])])).expect_err("dup");
        assert!(err.message().contains("duplicate"));
        let err = check_plan(&plan(&[("Build UI", &[]), ("build  ui", &[])])).expect_err("dup");
        assert!(err.message().contains("collide"));
    }

    #[test]
    fn unresolved_reference_is_rejected() {
        let err = check_plan(&plan(&[("A", &["Z"])])).expect_err("unknown");
        assert!(err.message().contains("'A' depends on 'Z'"));
    }

    #[test]
    fn cycles_are_rejected_with_path() {
        let err = check_plan(&plan(&[("A", &["C"]), ("B", &["A"]), ("C", &["B"])]))
            .expect_err("cycle");
        assert!(err.message().contains("dependency cycle"));
        assert!(err.message().contains("A -> C -> B -> A"));
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        check_plan(&plan(&[("A", &["A"])])).expect_err("cycle");
    }

    #[test]
    fn validate_plan_reports_missing_fields() {
        let raw = json!({"phases": [{"name": "A", "depends_on": []}]});
        let err = validate_plan(&raw).expect_err("missing description");
        assert!(err.message().contains("description"));
    }

    #[test]
    fn validate_plan_accepts_two_phase_plan() {
        let raw = json!({"phases": [
            {"name": "A", "description": "first", "depends_on": []},
            {"name": "B", "description": "second", "depends_on": ["A"]}
        ]});
        let plan = validate_plan(&raw).expect("valid");
        assert_eq!(plan.phases.len(), 2);
    }
}
