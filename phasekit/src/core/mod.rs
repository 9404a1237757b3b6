//! Deterministic, pure logic shared by the orchestration layer.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod actions;
pub mod command;
pub mod content;
pub mod json_repair;
pub mod loop_guard;
pub mod order;
pub mod path;
pub mod plan;
pub mod sanitize;
pub mod schema;
pub mod signature;
pub mod state;
pub mod types;
