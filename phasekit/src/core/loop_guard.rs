//! Anti-runaway check, run after every registered action.

use crate::core::state::AgentState;
use crate::error::LoopGuardError;

/// Ceilings enforced by [`check`]. Each limit is inclusive: reaching it is
/// fine, exceeding it trips the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopLimits {
    pub max_iterations: u32,
    pub max_actions_per_phase: u32,
    pub max_phase_repetitions: u32,
    /// Length of the identical-action streak that counts as a live-lock.
    pub same_action_streak: usize,
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            max_actions_per_phase: 10,
            max_phase_repetitions: 3,
            same_action_streak: 5,
        }
    }
}

/// Stateless check over the current bookkeeping.
pub fn check(state: &AgentState, limits: &LoopLimits) -> Result<(), LoopGuardError> {
    let trip = |reason: String| LoopGuardError {
        phase: state.current_phase.clone(),
        iteration: state.iteration_count,
        reason,
    };

    if state.iteration_count > limits.max_iterations {
        return Err(trip(format!(
            "exceeded {} total iterations",
            limits.max_iterations
        )));
    }
    if state.phase_action_count > limits.max_actions_per_phase {
        return Err(trip(format!(
            "phase issued more than {} actions",
            limits.max_actions_per_phase
        )));
    }
    if let Some(phase) = &state.current_phase
        && state.repetitions(phase) > limits.max_phase_repetitions
    {
        return Err(trip(format!(
            "phase entered more than {} times",
            limits.max_phase_repetitions
        )));
    }
    if let Some(reason) = streak_violation(state, limits.same_action_streak) {
        return Err(trip(reason));
    }
    Ok(())
}

/// The last `k` actions share one type; for file actions they must also share
/// one non-empty path. Bursts of writes to distinct files are normal.
fn streak_violation(state: &AgentState, k: usize) -> Option<String> {
    let history = &state.action_history;
    if k == 0 || history.len() < k {
        return None;
    }
    let tail = &history[history.len() - k..];
    let kind = tail[0].action.kind();
    if tail.iter().any(|record| record.action.kind() != kind) {
        return None;
    }
    if !tail[0].action.is_file_action() {
        return Some(format!("{k} consecutive '{kind}' actions"));
    }
    let target = |idx: usize| {
        tail[idx]
            .action
            .path()
            .unwrap_or_default()
            .trim()
            .to_lowercase()
    };
    let first = target(0);
    if first.is_empty() || (1..k).any(|idx| target(idx) != first) {
        return None;
    }
    Some(format!("{k} consecutive writes to the same file ({first})"))
}
