//! Self-healing verification loop.
//!
//! Runs the checks the plan asked for, and on failure hands the concrete
//! failing output back to the agent with a fix-only instruction, bounded by
//! a maximum retry count. Exhaustion is an observable terminal state, not an
//! implicit loop fallthrough: the full attempt history is returned.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::agent::AgentInvoker;
use crate::error::Result;
use crate::process::CommandRunner;
use crate::prompts;

/// One failing check: label plus captured output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckFailure {
    pub label: String,
    pub output: String,
}

/// Result of one verification attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationOutcome {
    /// 1-based attempt number.
    pub attempt: u32,
    pub passed: bool,
    pub failures: Vec<CheckFailure>,
}

/// A resolved check: what to run and whether it is the format check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckCommand {
    pub label: String,
    pub command: String,
    pub is_format: bool,
}

/// Captured execution of one check, pass or fail. The evidence stage keeps
/// these verbatim.
#[derive(Debug, Clone)]
pub struct CheckRun {
    pub label: String,
    pub command: String,
    pub passed: bool,
    pub output: String,
}

/// Maps check labels from the meta record to shell commands.
///
/// An unknown label is run verbatim as a shell command, so plans can request
/// repo-specific checks without config changes.
#[derive(Debug, Clone)]
pub struct CheckCatalog {
    commands: HashMap<String, String>,
    format_label: String,
    format_fix: Option<String>,
}

impl CheckCatalog {
    pub fn new(commands: HashMap<String, String>, format_label: impl Into<String>, format_fix: Option<String>) -> Self {
        Self {
            commands,
            format_label: format_label.into(),
            format_fix,
        }
    }

    pub fn format_fix(&self) -> Option<&str> {
        self.format_fix.as_deref()
    }

    /// Resolve labels into runnable checks, in the order given.
    pub fn resolve(&self, labels: &[String]) -> Vec<CheckCommand> {
        labels
            .iter()
            .filter(|l| !l.trim().is_empty())
            .map(|label| {
                let label = label.trim();
                let command = self.commands.get(label).cloned().unwrap_or_else(|| label.to_string());
                CheckCommand {
                    label: label.to_string(),
                    command,
                    is_format: label == self.format_label,
                }
            })
            .collect()
    }
}

/// Run every check once, capturing output verbatim.
pub async fn run_checks(runner: &CommandRunner, workdir: &Path, checks: &[CheckCommand]) -> Result<Vec<CheckRun>> {
    let mut runs = Vec::with_capacity(checks.len());
    for check in checks {
        let result = runner.shell(workdir, &check.command).await?;
        runs.push(CheckRun {
            label: check.label.clone(),
            command: check.command.clone(),
            passed: result.success(),
            output: result.combined_output(),
        });
    }
    Ok(runs)
}

/// Everything the pipeline needs to know after healing finished.
#[derive(Debug, Clone)]
pub struct HealReport {
    pub outcomes: Vec<VerificationOutcome>,
    pub passed: bool,
    /// Failed attempts consumed; never exceeds the configured maximum.
    pub retries: u32,
}

/// The bounded verify-and-heal state machine.
pub struct VerificationLoop<'a> {
    runner: CommandRunner,
    invoker: &'a AgentInvoker,
    catalog: &'a CheckCatalog,
    max_retries: u32,
}

impl<'a> VerificationLoop<'a> {
    pub fn new(invoker: &'a AgentInvoker, catalog: &'a CheckCatalog, max_retries: u32) -> Self {
        Self {
            runner: CommandRunner::new(),
            invoker,
            catalog,
            max_retries,
        }
    }

    /// Run the loop for one cycle's workspace.
    ///
    /// Per attempt: run all checks; a failing format check gets one
    /// deterministic auto-fix and re-check before it counts. If failures
    /// remain and retries are not exhausted, the agent is invoked with a
    /// fix-only prompt and the checks run again.
    pub async fn run(&self, cycle_id: &str, workdir: &Path, labels: &[String]) -> Result<HealReport> {
        let checks = self.catalog.resolve(labels);
        let mut outcomes: Vec<VerificationOutcome> = Vec::new();

        for attempt in 1..=self.max_retries.max(1) {
            let failures = self.run_attempt(workdir, &checks).await?;
            let passed = failures.is_empty();
            outcomes.push(VerificationOutcome {
                attempt,
                passed,
                failures: failures.clone(),
            });

            if passed {
                log::info!("verification passed on attempt {} for cycle {}", attempt, cycle_id);
                return Ok(HealReport {
                    passed: true,
                    retries: attempt - 1,
                    outcomes,
                });
            }

            log::warn!(
                "verification attempt {}/{} failed for cycle {}: {}",
                attempt,
                self.max_retries,
                cycle_id,
                failures.iter().map(|f| f.label.as_str()).collect::<Vec<_>>().join(", ")
            );

            if attempt < self.max_retries {
                let prompt = prompts::fix(&failures, attempt, self.max_retries);
                let label = format!("verify-fix-{}", attempt);
                if let Err(e) = self.invoker.invoke(&label, cycle_id, workdir, &prompt, &[]).await {
                    // A crashed fix agent consumes the retry; the next
                    // verification attempt will report the same failures.
                    log::warn!("fix agent failed on attempt {}: {}", attempt, e);
                }
            }
        }

        Ok(HealReport {
            passed: false,
            retries: self.max_retries,
            outcomes,
        })
    }

    /// One verification pass over all checks; returns remaining failures.
    async fn run_attempt(&self, workdir: &Path, checks: &[CheckCommand]) -> Result<Vec<CheckFailure>> {
        let mut failures = Vec::new();
        for check in checks {
            let mut result = self.runner.shell(workdir, &check.command).await?;

            // Format failures are deterministically auto-fixable; they only
            // count when the fixer does not resolve them.
            if !result.success()
                && check.is_format
                && let Some(fix_cmd) = self.catalog.format_fix()
            {
                log::info!("format check failed; running auto-fix");
                let fix = self.runner.shell(workdir, fix_cmd).await?;
                if fix.success() {
                    result = self.runner.shell(workdir, &check.command).await?;
                }
            }

            if !result.success() {
                failures.push(CheckFailure {
                    label: check.label.clone(),
                    output: result.combined_output(),
                });
            }
        }
        Ok(failures)
    }
}
