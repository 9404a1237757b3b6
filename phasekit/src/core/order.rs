//! Deterministic phase ordering.

use std::collections::BTreeSet;

use crate::core::plan::DependencyGraph;
use crate::error::ValidationError;

/// Kahn's algorithm over a resolved dependency graph.
///
/// Among phases that are ready at the same time, the one declared first in the
/// plan runs first, so an already-ordered plan keeps its order.
pub fn topological_order(graph: &DependencyGraph) -> Result<Vec<usize>, ValidationError> {
    let n = graph.len();
    let mut indegree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (node, deps) in graph.deps.iter().enumerate() {
        for dep in deps {
            if *dep >= n {
                return Err(ValidationError::new(format!(
                    "dependency index {dep} out of range"
                )));
            }
            indegree[node] += 1;
            dependents[*dep].push(node);
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|idx| indegree[*idx] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for dependent in &dependents[next] {
            indegree[*dependent] -= 1;
            if indegree[*dependent] == 0 {
                ready.insert(*dependent);
            }
        }
    }

    if order.len() != n {
        let stuck: Vec<String> = (0..n)
            .filter(|idx| indegree[*idx] > 0)
            .map(|idx| idx.to_string())
            .collect();
        return Err(ValidationError::new(format!(
            "residual dependency cycle among phases [{}]",
            stuck.join(", ")
        )));
    }
    Ok(order)
}
