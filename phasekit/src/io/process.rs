//! Helpers for running child processes with timeouts and bounded output.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::sanitize::strip_ansi;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.status.code()
    }

    /// Stdout then stderr, ANSI-stripped, with truncation and timeout notices.
    pub fn combined(&self, label: &str) -> String {
        let mut buf = String::new();
        buf.push_str(&String::from_utf8_lossy(&self.stdout));
        if self.stdout_truncated > 0 {
            buf.push_str(&format!(
                "\n[{label} stdout truncated {} bytes]\n",
                self.stdout_truncated
            ));
        }
        let stderr = String::from_utf8_lossy(&self.stderr);
        if !stderr.trim().is_empty() {
            if !buf.is_empty() && !buf.ends_with('\n') {
                buf.push('\n');
            }
            buf.push_str(&stderr);
        }
        if self.stderr_truncated > 0 {
            buf.push_str(&format!(
                "\n[{label} stderr truncated {} bytes]\n",
                self.stderr_truncated
            ));
        }
        if self.timed_out {
            buf.push_str(&format!("\n[{label} timed out]\n"));
        }
        strip_ansi(&buf)
    }
}

/// Build `sh -c <command>` rooted at `cwd` with extra environment.
pub fn shell_command(command: &str, cwd: &Path, env: &BTreeMap<String, String>) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command).current_dir(cwd).envs(env);
    cmd
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
/// The child leads its own process group so a timeout kills everything it spawned.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        if let Err(e) = child_stdin.write_all(input) {
            // The child may exit before reading everything; its status tells the story.
            warn!(err = %e, "failed to write full stdin");
        }
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing process group"
            );
            timed_out = true;
            kill_tree(&mut child)?;
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

#[cfg(unix)]
fn kill_tree(child: &mut Child) -> Result<()> {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = i32::try_from(child.id()).context("child pid out of range")?;
    if let Err(errno) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        warn!(err = %errno, "killpg failed, killing child only");
        child.kill().context("kill command")?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) -> Result<()> {
    child.kill().context("kill command")
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn captures_combined_output_and_exit_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        let env = BTreeMap::from([("GREETING".to_string(), "hi".to_string())]);
        let cmd = shell_command("echo $GREETING; echo oops >&2; exit 3", temp.path(), &env);
        let out = run_command_with_timeout(cmd, None, Duration::from_secs(10), 1000).expect("run");
        assert_eq!(out.exit_code(), Some(3));
        assert!(!out.success());
        let combined = out.combined("cmd");
        assert!(combined.contains("hi"));
        assert!(combined.contains("oops"));
    }

    #[test]
    fn feeds_stdin() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cmd = shell_command("cat", temp.path(), &BTreeMap::new());
        let out = run_command_with_timeout(cmd, Some(b"prompt text"), Duration::from_secs(10), 1000)
            .expect("run");
        assert!(out.success());
        assert_eq!(out.stdout, b"prompt text");
    }

    #[test]
    fn timeout_kills_the_whole_group() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cmd = shell_command("sleep 30 & sleep 30; wait", temp.path(), &BTreeMap::new());
        let started = Instant::now();
        let out =
            run_command_with_timeout(cmd, None, Duration::from_millis(300), 1000).expect("run");
        assert!(out.timed_out);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(out.combined("cmd").contains("timed out"));
    }

    #[test]
    fn output_is_bounded() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cmd = shell_command("yes | head -c 5000", temp.path(), &BTreeMap::new());
        let out = run_command_with_timeout(cmd, None, Duration::from_secs(10), 100).expect("run");
        assert_eq!(out.stdout.len(), 100);
        assert_eq!(out.stdout_truncated, 4900);
    }
}
