//! Command runner for external processes.
//!
//! Everything the orchestrator observes about verification commands, git and
//! the hosting CLI is an exit code plus captured output. A non-zero exit is
//! data, not an error: callers inspect `ExecResult` and decide. `Err` is
//! reserved for spawn failures (missing binary, bad working directory).

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::error::{NightshiftError, Result};

/// Captured outcome of one external command.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout and stderr joined for logs and fix prompts.
    pub fn combined_output(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (true, true) => String::new(),
            (false, true) => self.stdout.trim_end().to_string(),
            (true, false) => self.stderr.trim_end().to_string(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
        }
    }
}

/// Runs shell commands and git invocations with a working directory.
///
/// The optional timeout is the single layering point for bounding external
/// processes; stage contracts never change when it is set.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    timeout_ms: Option<u64>,
}

impl CommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every command this runner executes.
    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// Run a shell command (`sh -c`) in `dir`.
    pub async fn shell(&self, dir: &Path, command: &str) -> Result<ExecResult> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        self.run(cmd, dir, command).await
    }

    /// Run `git` with the given arguments in `dir`.
    pub async fn git(&self, dir: &Path, args: &[&str]) -> Result<ExecResult> {
        let mut cmd = Command::new("git");
        cmd.args(args);
        self.run(cmd, dir, &format!("git {}", args.join(" "))).await
    }

    /// Run an arbitrary program with arguments in `dir`.
    pub async fn program(&self, dir: &Path, program: &str, args: &[String]) -> Result<ExecResult> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        self.run(cmd, dir, program).await
    }

    async fn run(&self, mut cmd: Command, dir: &Path, label: &str) -> Result<ExecResult> {
        cmd.current_dir(dir);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let output = match self.timeout_ms {
            Some(ms) => {
                let child = cmd
                    .spawn()
                    .map_err(|e| NightshiftError::Io(std::io::Error::other(format!("failed to spawn '{}': {}", label, e))))?;
                let timeout = tokio::time::Duration::from_millis(ms);
                match tokio::time::timeout(timeout, child.wait_with_output()).await {
                    Ok(result) => result?,
                    Err(_) => {
                        return Ok(ExecResult {
                            stdout: String::new(),
                            stderr: format!("command '{}' timed out after {}ms", label, ms),
                            exit_code: 124,
                        });
                    }
                }
            }
            None => cmd
                .output()
                .await
                .map_err(|e| NightshiftError::Io(std::io::Error::other(format!("failed to spawn '{}': {}", label, e))))?,
        };

        Ok(ExecResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(1),
        })
    }
}
