//! Invocation of the external code-generation agent.
//!
//! The agent is an opaque, non-deterministic subprocess with full filesystem
//! access inside its workspace. The invoker persists every prompt verbatim
//! before launch and the raw transcript after, so each decision is
//! reproducible by inspection. Control flow never parses the transcript:
//! decisions arrive as files the prompt mandates, and missing mandated files
//! fail the stage.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::artifacts::{ArtifactStore, SCRATCH_DIR};
use crate::error::{NightshiftError, Result};
use crate::process::{CommandRunner, ExecResult};

/// The external code-generation agent, abstracted for tests.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Run the agent with a prompt inside a workspace, blocking until exit.
    async fn run(&self, workdir: &Path, prompt: &str) -> Result<ExecResult>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Agent backed by a CLI binary (`claude -p <prompt>` and the like).
///
/// The prompt is appended as the final argument; the workspace is the
/// working directory.
pub struct CliAgent {
    program: String,
    args: Vec<String>,
    runner: CommandRunner,
}

impl CliAgent {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            runner: CommandRunner::new(),
        }
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.runner = self.runner.with_timeout_ms(ms);
        self
    }
}

#[async_trait]
impl Agent for CliAgent {
    async fn run(&self, workdir: &Path, prompt: &str) -> Result<ExecResult> {
        let mut args = self.args.clone();
        args.push(prompt.to_string());
        self.runner.program(workdir, &self.program, &args).await
    }

    fn describe(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}

/// Result of one agent invocation: where the audit trail landed.
#[derive(Debug, Clone)]
pub struct AgentTranscript {
    pub prompt_path: PathBuf,
    pub transcript_path: PathBuf,
    pub output: String,
}

/// Drives agent invocations and enforces the file contract.
pub struct AgentInvoker {
    agent: Box<dyn Agent>,
    store: ArtifactStore,
}

impl AgentInvoker {
    pub fn new(agent: Box<dyn Agent>, store: ArtifactStore) -> Self {
        Self { agent, store }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Invoke the agent for one stage.
    ///
    /// `label` keys the prompt/transcript artifacts (a stage name, or
    /// `verify-fix-N` for healing attempts). `expected_files` are the paths
    /// the prompt mandated; any missing one is a stage contract violation.
    pub async fn invoke(
        &self,
        label: &str,
        cycle_id: &str,
        workdir: &Path,
        prompt: &str,
        expected_files: &[PathBuf],
    ) -> Result<AgentTranscript> {
        let prompt_path = self
            .store
            .write(&format!("prompt-{}-{}.md", label, cycle_id), prompt)?;

        // The contract files live under the workspace scratch dir; make sure
        // it exists so the agent only has to write files, not directories.
        std::fs::create_dir_all(workdir.join(SCRATCH_DIR))?;

        log::info!("[{}] invoking agent ({}) for cycle {}", label, self.agent.describe(), cycle_id);
        let result = self.agent.run(workdir, prompt).await?;

        let transcript_path = self.store.write(
            &format!("transcript-{}-{}.log", label, cycle_id),
            &result.combined_output(),
        )?;

        if !result.success() {
            return Err(NightshiftError::Agent(format!(
                "agent exited {} during '{}'; transcript at {}",
                result.exit_code,
                label,
                transcript_path.display()
            )));
        }

        let missing: Vec<String> = expected_files
            .iter()
            .filter(|p| !p.exists())
            .map(|p| p.display().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(NightshiftError::stage(
                label,
                format!("agent did not produce required file(s): {}", missing.join(", ")),
            ));
        }

        Ok(AgentTranscript {
            prompt_path,
            transcript_path,
            output: result.combined_output(),
        })
    }
}
