//! Domain types for one development cycle.
//!
//! A cycle is one end-to-end attempt to produce a reviewable change. Retry
//! counts, stage outcomes and publication results live on these values and
//! travel through the pipeline; there is no ambient mutable state.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{NightshiftError, Result};

/// Terminal status of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CycleStatus {
    /// Still executing stages.
    Running,
    /// Implemented, verified and handed to publication.
    Succeeded,
    /// Verification retries exhausted; published for human review anyway.
    TestsFailed,
    /// A hard stage failure ended the cycle early.
    Aborted,
}

impl CycleStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CycleStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Running => "running",
            CycleStatus::Succeeded => "succeeded",
            CycleStatus::TestsFailed => "tests-failed",
            CycleStatus::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The fixed pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Research,
    Plan,
    Annotate,
    Implement,
    Verify,
    Review,
    Evidence,
    Summarize,
    Publish,
    Merge,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Research => "research",
            Stage::Plan => "plan",
            Stage::Annotate => "annotate",
            Stage::Implement => "implement",
            Stage::Verify => "verify",
            Stage::Review => "review",
            Stage::Evidence => "evidence",
            Stage::Summarize => "summarize",
            Stage::Publish => "publish",
            Stage::Merge => "merge",
        }
    }

    /// All stages in pipeline order.
    pub fn ordered() -> &'static [Stage] {
        &[
            Stage::Research,
            Stage::Plan,
            Stage::Annotate,
            Stage::Implement,
            Stage::Verify,
            Stage::Review,
            Stage::Evidence,
            Stage::Summarize,
            Stage::Publish,
            Stage::Merge,
        ]
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: Stage,
    /// Agent transcript, when the stage invoked the agent.
    pub transcript: Option<PathBuf>,
    /// Artifacts this stage was required to produce (and did).
    pub artifacts: Vec<PathBuf>,
    pub ok: bool,
    /// Short note for the run report ("no review file", failure reason, ...).
    pub note: String,
}

impl StageResult {
    pub fn ok(stage: Stage) -> Self {
        Self {
            stage,
            transcript: None,
            artifacts: Vec::new(),
            ok: true,
            note: String::new(),
        }
    }

    pub fn failed(stage: Stage, note: impl Into<String>) -> Self {
        Self {
            stage,
            transcript: None,
            artifacts: Vec::new(),
            ok: false,
            note: note.into(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    pub fn with_transcript(mut self, path: PathBuf) -> Self {
        self.transcript = Some(path);
        self
    }

    pub fn with_artifact(mut self, path: PathBuf) -> Self {
        self.artifacts.push(path);
        self
    }
}

/// Machine-readable decision record the planning stage must produce.
///
/// This is the control contract with the agent: decisions arrive in this
/// file, never in prose. The four control fields must be populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub branch_name: String,
    pub pr_title: String,
    pub commit_message: String,
    #[serde(default)]
    pub tests_to_run: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

impl Meta {
    /// Parse and validate a meta record from JSON.
    pub fn from_json(raw: &str) -> Result<Self> {
        let meta: Meta = serde_json::from_str(raw)?;
        meta.validate()?;
        Ok(meta)
    }

    /// All four control fields must be populated.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.branch_name.trim().is_empty() {
            missing.push("branch_name");
        }
        if self.pr_title.trim().is_empty() {
            missing.push("pr_title");
        }
        if self.commit_message.trim().is_empty() {
            missing.push("commit_message");
        }
        if self.tests_to_run.iter().all(|t| t.trim().is_empty()) {
            missing.push("tests_to_run");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(NightshiftError::stage(
                "plan",
                format!("meta record missing required fields: {}", missing.join(", ")),
            ))
        }
    }
}

/// How publication ended for a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeOutcome {
    Merged,
    /// Merge was attempted and rejected (checks, conflicts); left for a human.
    Held,
    /// Push or pull-request creation itself failed.
    Failed,
    NotAttempted,
}

impl MergeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeOutcome::Merged => "merged",
            MergeOutcome::Held => "held",
            MergeOutcome::Failed => "failed",
            MergeOutcome::NotAttempted => "not-attempted",
        }
    }
}

/// Record of a cycle's publication attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationRecord {
    pub branch: String,
    /// Remote pull-request number; None until created.
    pub pr_number: Option<u64>,
    pub outcome: MergeOutcome,
}

impl PublicationRecord {
    pub fn not_attempted() -> Self {
        Self {
            branch: String::new(),
            pr_number: None,
            outcome: MergeOutcome::NotAttempted,
        }
    }
}

/// One end-to-end attempt to produce one reviewable change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cycle {
    /// 1-based ordinal within the run.
    pub index: u32,
    /// Timestamp + ordinal identifier, unique within the run.
    pub id: String,
    pub started_at: DateTime<Utc>,
    /// Control fields from the planning stage; None until Plan completes.
    pub meta: Option<Meta>,
    /// Verification retries consumed (failed attempts).
    pub retries: u32,
    pub status: CycleStatus,
    pub stages: Vec<StageResult>,
    pub publication: PublicationRecord,
    /// Constraint breaches and other report-worthy observations.
    pub observations: Vec<String>,
}

impl Cycle {
    pub fn new(index: u32, id: impl Into<String>) -> Self {
        Self {
            index,
            id: id.into(),
            started_at: Utc::now(),
            meta: None,
            retries: 0,
            status: CycleStatus::Running,
            stages: Vec::new(),
            publication: PublicationRecord::not_attempted(),
            observations: Vec::new(),
        }
    }

    pub fn branch(&self) -> Option<&str> {
        self.meta.as_ref().map(|m| m.branch_name.as_str())
    }

    pub fn record_stage(&mut self, result: StageResult) {
        self.stages.push(result);
    }

    pub fn observe(&mut self, note: impl Into<String>) {
        self.observations.push(note.into());
    }

    /// Whether this cycle's change is safe to merge without a human look.
    pub fn safe_to_publish(&self) -> bool {
        self.status == CycleStatus::Succeeded
    }
}
