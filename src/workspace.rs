//! Workspace isolation via git worktrees.
//!
//! Each cycle gets a fresh detached worktree so the agent can never observe
//! or corrupt another cycle's in-progress edits, and a crash mid-cycle never
//! contaminates the primary working copy. Release is best-effort: cleanup
//! failure must not block the loop.

use std::path::{Path, PathBuf};

use crate::error::{NightshiftError, Result};
use crate::process::CommandRunner;

/// An isolated working copy allocated to exactly one cycle.
#[derive(Debug, Clone)]
pub struct WorkspaceHandle {
    pub cycle_id: String,
    pub path: PathBuf,
    /// Resolved commit hash the worktree was detached at.
    pub base_commit: String,
}

/// Allocates and reclaims per-cycle worktrees under a base directory.
#[derive(Debug)]
pub struct WorkspaceManager {
    repo_root: PathBuf,
    base_path: PathBuf,
    runner: CommandRunner,
}

impl WorkspaceManager {
    pub fn new(repo_root: impl Into<PathBuf>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            base_path: base_path.into(),
            runner: CommandRunner::new(),
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Target path for a cycle's worktree.
    pub fn path_for(&self, cycle_id: &str) -> PathBuf {
        self.base_path.join(cycle_id)
    }

    /// Resolve a revision in the primary repository.
    pub async fn resolve_revision(&self, revision: &str) -> Result<String> {
        let result = self.runner.git(&self.repo_root, &["rev-parse", revision]).await?;
        if !result.success() {
            return Err(NightshiftError::Workspace(format!(
                "cannot resolve base revision '{}': {}",
                revision,
                result.combined_output()
            )));
        }
        Ok(result.stdout.trim().to_string())
    }

    /// Allocate a fresh detached worktree at the given base revision.
    ///
    /// A leftover allocation at the target path (stale worktree from a
    /// crashed prior cycle) is reclaimed first, loudly.
    pub async fn acquire(&self, cycle_id: &str, base_revision: &str) -> Result<WorkspaceHandle> {
        let path = self.path_for(cycle_id);

        std::fs::create_dir_all(&self.base_path)
            .map_err(|e| NightshiftError::Workspace(format!("failed to create {}: {}", self.base_path.display(), e)))?;

        if path.exists() {
            log::warn!("reclaiming stale workspace at {}", path.display());
            self.reclaim(&path).await;
        }

        let base_commit = self.resolve_revision(base_revision).await?;

        let path_str = path.to_string_lossy();
        let result = self
            .runner
            .git(&self.repo_root, &["worktree", "add", "--detach", &path_str, &base_commit])
            .await?;
        if !result.success() {
            return Err(NightshiftError::Workspace(format!(
                "git worktree add failed for {}: {}",
                cycle_id,
                result.combined_output()
            )));
        }

        log::info!("acquired workspace {} at {}", cycle_id, path.display());
        Ok(WorkspaceHandle {
            cycle_id: cycle_id.to_string(),
            path,
            base_commit,
        })
    }

    /// Remove the worktree and its registration. Never fails the caller:
    /// cleanup problems are logged and swallowed.
    pub async fn release(&self, handle: &WorkspaceHandle) {
        self.reclaim(&handle.path).await;
        log::info!("released workspace {}", handle.cycle_id);
    }

    async fn reclaim(&self, path: &Path) {
        let path_str = path.to_string_lossy();
        match self
            .runner
            .git(&self.repo_root, &["worktree", "remove", "--force", &path_str])
            .await
        {
            Ok(result) if !result.success() => {
                log::warn!("git worktree remove {}: {}", path.display(), result.combined_output());
            }
            Err(e) => log::warn!("git worktree remove {}: {}", path.display(), e),
            _ => {}
        }
        if path.exists()
            && let Err(e) = std::fs::remove_dir_all(path)
        {
            log::warn!("remove_dir_all {}: {}", path.display(), e);
        }
        if let Err(e) = self.runner.git(&self.repo_root, &["worktree", "prune"]).await {
            log::warn!("git worktree prune: {}", e);
        }
    }

    // ── Workspace state reads (used to validate the implement stage) ─────

    /// Current branch name in a workspace; None when HEAD is detached.
    pub async fn current_branch(&self, workspace: &Path) -> Result<Option<String>> {
        let result = self
            .runner
            .git(workspace, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await?;
        if !result.success() {
            return Err(NightshiftError::Workspace(format!(
                "rev-parse HEAD failed in {}: {}",
                workspace.display(),
                result.combined_output()
            )));
        }
        let branch = result.stdout.trim().to_string();
        if branch == "HEAD" { Ok(None) } else { Ok(Some(branch)) }
    }

    /// Number of commits in a workspace beyond the base commit.
    pub async fn commits_since(&self, workspace: &Path, base_commit: &str) -> Result<u32> {
        let range = format!("{}..HEAD", base_commit);
        let result = self.runner.git(workspace, &["rev-list", "--count", &range]).await?;
        if !result.success() {
            return Err(NightshiftError::Workspace(format!(
                "rev-list failed in {}: {}",
                workspace.display(),
                result.combined_output()
            )));
        }
        Ok(result.stdout.trim().parse().unwrap_or(0))
    }

    /// Whether the workspace has no uncommitted changes.
    pub async fn is_clean(&self, workspace: &Path) -> Result<bool> {
        let result = self.runner.git(workspace, &["status", "--porcelain"]).await?;
        if !result.success() {
            return Err(NightshiftError::Workspace(format!(
                "git status failed in {}: {}",
                workspace.display(),
                result.combined_output()
            )));
        }
        Ok(result.stdout.trim().is_empty())
    }
}
