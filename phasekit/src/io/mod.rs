//! Side-effecting operations: config files, processes, the oracle transport,
//! workspaces on disk, prompt rendering, and the quality gate.

pub mod config;
pub mod context;
pub mod oracle;
pub mod process;
pub mod prompt;
pub mod quality;
pub mod workspace;
