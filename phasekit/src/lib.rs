//! Deterministic orchestration core for oracle-driven project generation.
//!
//! A goal becomes a validated, dependency-ordered plan of phases; each phase
//! becomes a validated batch of actions executed inside a per-task sandbox,
//! followed by a quality gate and bounded autofix rounds. The oracle is the
//! only non-deterministic input and sits behind a trait.
//!
//! - **[`core`]**: Pure logic (plan and action validation, ordering, state,
//!   loop guard, JSON repair, content checks). No I/O.
//! - **[`io`]**: Side effects (config files, processes, oracle transport,
//!   workspaces, prompt rendering, quality gate).
//!
//! Orchestration modules ([`planner`], [`executor`], [`orchestrator`]) compose
//! the two.

pub mod cancel;
pub mod core;
pub mod error;
pub mod executor;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod planner;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
