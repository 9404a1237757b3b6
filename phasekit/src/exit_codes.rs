//! Stable exit codes for the `phasekit` CLI.

/// Command succeeded; for `run`, the task finished with `ok = true`.
pub const OK: i32 = 0;
/// Invalid input, config, plan, or action file, or any unexpected error.
pub const INVALID: i32 = 1;
/// The task ran to the end but a phase is still failing.
pub const TASK_FAILED: i32 = 2;
/// The loop guard stopped the task.
pub const LOOP_GUARD: i32 = 3;
/// The oracle never produced a usable plan or action batch.
pub const PLANNER: i32 = 4;
/// The task was cancelled.
pub const CANCELLED: i32 = 5;
