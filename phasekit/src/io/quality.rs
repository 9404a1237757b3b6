//! Quality gate: ordered build/lint/test/e2e commands against the project root.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::cancel::CancelFlag;
use crate::core::signature::{error_codes, error_signature};
use crate::core::types::QualityCheckReport;
use crate::io::config::QualityCheck;
use crate::io::process::{run_command_with_timeout, shell_command};
use crate::io::workspace::manifest_has_target;

/// Raw outcome of one check command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRun {
    pub exit_code: Option<i32>,
    pub output: String,
    pub timed_out: bool,
}

impl CheckRun {
    pub fn ok(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

#[derive(Debug, Clone)]
pub struct QualityRequest {
    pub workdir: PathBuf,
    pub command: String,
    pub timeout: Duration,
}

pub trait QualityRunner {
    fn run(&self, request: &QualityRequest) -> Result<CheckRun>;
}

impl<T: QualityRunner + ?Sized> QualityRunner for &T {
    fn run(&self, request: &QualityRequest) -> Result<CheckRun> {
        (**self).run(request)
    }
}

/// Runs each check through `sh -c` with the configured environment.
pub struct ShellQualityRunner {
    pub env: BTreeMap<String, String>,
    pub output_limit_bytes: usize,
}

impl QualityRunner for ShellQualityRunner {
    #[instrument(skip_all, fields(command = %request.command))]
    fn run(&self, request: &QualityRequest) -> Result<CheckRun> {
        let cmd = shell_command(&request.command, &request.workdir, &self.env);
        let output = run_command_with_timeout(cmd, None, request.timeout, self.output_limit_bytes)
            .with_context(|| format!("run quality check {}", request.command))?;
        Ok(CheckRun {
            exit_code: output.exit_code(),
            output: output.combined("check"),
            timed_out: output.timed_out,
        })
    }
}

/// Run the applicable checks in order and report each one.
///
/// Checks gated on a manifest target are skipped when the target is missing. A
/// runner error or timeout becomes a failed report, never an abort.
#[instrument(skip_all, fields(project_root = %project_root.display(), checks = checks.len()))]
pub fn run_quality_gate<R: QualityRunner>(
    runner: &R,
    checks: &[QualityCheck],
    project_root: &Path,
    marker: &str,
    cancel: &CancelFlag,
) -> Result<Vec<QualityCheckReport>> {
    let mut reports = Vec::new();
    for check in checks {
        if let Some(target) = &check.requires_target
            && !manifest_has_target(project_root, marker, target)
        {
            info!(command = %check.command, required_target = %target, "skipping check without target");
            continue;
        }
        cancel.check()?;

        let request = QualityRequest {
            workdir: project_root.to_path_buf(),
            command: check.command.clone(),
            timeout: Duration::from_secs(check.timeout_secs),
        };
        let run = runner.run(&request).unwrap_or_else(|err| CheckRun {
            exit_code: None,
            output: format!("{err:#}"),
            timed_out: false,
        });
        let ok = run.ok();
        if !ok {
            warn!(command = %check.command, exit_code = ?run.exit_code, timed_out = run.timed_out, "quality check failed");
        }
        reports.push(QualityCheckReport {
            command: check.command.clone(),
            category: check.category,
            ok,
            exit_code: run.exit_code,
            error_signature: error_signature(&run.output),
            error_codes: error_codes(&run.output),
            output: run.output,
            timed_out: run.timed_out,
        });
    }
    Ok(reports)
}
