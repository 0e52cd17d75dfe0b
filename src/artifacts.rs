//! Artifact store: the per-run log directory.
//!
//! Every prompt, transcript, plan, meta record, evidence capture and result
//! lands here as a UTF-8 text file keyed by cycle id. The store is the audit
//! trail: the agent is non-deterministic, so decisions must be reproducible
//! by inspection even though the agent itself is not.

use std::fs;
use std::path::{Path, PathBuf};

use crate::cycle::Stage;
use crate::error::{NightshiftError, Result};

/// Name of the scratch directory inside a workspace where the agent is told
/// to write its contract files (plan, meta, review, result, ...).
pub const SCRATCH_DIR: &str = ".nightshift";

/// Deterministic read/write of text artifacts under one run's log directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open (creating if needed) the store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| NightshiftError::Artifact(format!("failed to create {}: {}", root.display(), e)))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Write a text artifact, returning its path.
    pub fn write(&self, name: &str, content: &str) -> Result<PathBuf> {
        let path = self.path(name);
        fs::write(&path, content)
            .map_err(|e| NightshiftError::Artifact(format!("failed to write {}: {}", path.display(), e)))?;
        Ok(path)
    }

    pub fn read(&self, name: &str) -> Result<String> {
        let path = self.path(name);
        fs::read_to_string(&path)
            .map_err(|e| NightshiftError::Artifact(format!("failed to read {}: {}", path.display(), e)))
    }

    /// Read an artifact, falling back to an empty string when absent.
    pub fn read_or_empty(&self, name: &str) -> String {
        fs::read_to_string(self.path(name)).unwrap_or_default()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path(name).exists()
    }

    /// List artifact file names, sorted, for report aggregation.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file()
                && let Some(name) = entry.file_name().to_str()
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    // ── Per-cycle artifact names ─────────────────────────────────────────

    pub fn research_name(cycle_id: &str) -> String {
        format!("research-{}.md", cycle_id)
    }

    pub fn plan_name(cycle_id: &str) -> String {
        format!("plan-next-{}.md", cycle_id)
    }

    pub fn meta_name(cycle_id: &str) -> String {
        format!("meta-{}.json", cycle_id)
    }

    pub fn evidence_name(cycle_id: &str) -> String {
        format!("evidence-{}.md", cycle_id)
    }

    pub fn review_name(cycle_id: &str) -> String {
        format!("review-{}.md", cycle_id)
    }

    pub fn result_name(cycle_id: &str) -> String {
        format!("result-{}.md", cycle_id)
    }

    pub fn prompt_name(stage: Stage, cycle_id: &str) -> String {
        format!("prompt-{}-{}.md", stage.as_str(), cycle_id)
    }

    pub fn transcript_name(stage: Stage, cycle_id: &str) -> String {
        format!("transcript-{}-{}.log", stage.as_str(), cycle_id)
    }

    // ── Post-loop artifact names ─────────────────────────────────────────

    pub fn report_name(run_id: &str) -> String {
        format!("night-report-{}.md", run_id)
    }

    pub fn next_plan_name(run_id: &str) -> String {
        format!("next-session-plan-{}.md", run_id)
    }

    pub fn patterns_name() -> &'static str {
        "patterns.md"
    }
}

/// Path inside a workspace where the agent writes a contract file.
pub fn scratch_path(workspace: &Path, file: &str) -> PathBuf {
    workspace.join(SCRATCH_DIR).join(file)
}

/// Relative path string for prompts ("`.nightshift/meta.json`").
pub fn scratch_rel(file: &str) -> String {
    format!("{}/{}", SCRATCH_DIR, file)
}
