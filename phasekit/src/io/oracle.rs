//! Oracle abstraction: prompt in, completion out.
//!
//! The [`Oracle`] trait decouples orchestration from the transport used to
//! reach the model. [`CommandOracle`] spawns a configured CLI with the prompt
//! on stdin; tests use scripted oracles that return canned completions.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::process::run_command_with_timeout;

/// Exactly one call in flight per task; implementations need no locking.
pub trait Oracle {
    fn complete(&self, prompt: &str) -> Result<String>;
}

impl<T: Oracle + ?Sized> Oracle for &T {
    fn complete(&self, prompt: &str) -> Result<String> {
        (**self).complete(prompt)
    }
}

/// Oracle backed by an external command (e.g. `codex exec -`).
#[derive(Debug, Clone)]
pub struct CommandOracle {
    pub argv: Vec<String>,
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl Oracle for CommandOracle {
    #[instrument(skip_all, fields(program = ?self.argv.first(), prompt_bytes = prompt.len()))]
    fn complete(&self, prompt: &str) -> Result<String> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| anyhow!("oracle command is empty"))?;
        info!(workdir = %self.workdir.display(), "calling oracle");

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);
        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run oracle command {program}"))?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "oracle timed out");
            return Err(anyhow!("oracle timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "oracle command failed");
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "oracle command failed with status {:?}: {}",
                output.status.code(),
                stderr.trim()
            ));
        }

        let completion = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(completion_bytes = completion.len(), "oracle responded");
        Ok(completion)
    }
}
