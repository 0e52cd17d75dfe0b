//! Publication: push the branch, open a pull request, optionally merge.
//!
//! The hosting service is a seam so the pipeline can be tested without a
//! forge. Creation is read-before-write (duplicate PR creation is a hard
//! error on most hosting APIs), and a merge is attempted at most once —
//! auto-merge must never loop on a failing merge.

use std::path::Path;

use async_trait::async_trait;

use crate::cycle::{MergeOutcome, Meta, PublicationRecord};
use crate::error::{NightshiftError, Result};
use crate::process::CommandRunner;

/// Pull/merge-request operations on the code-hosting service.
#[async_trait]
pub trait HostingService: Send + Sync {
    /// Find an existing open pull request for a branch.
    async fn find_open_pull_request(&self, repo: &Path, branch: &str) -> Result<Option<u64>>;

    /// Create a pull request, returning its number.
    async fn create_pull_request(&self, repo: &Path, branch: &str, title: &str, body: &str, draft: bool) -> Result<u64>;

    /// Mark a draft pull request ready for review.
    async fn promote_from_draft(&self, repo: &Path, number: u64) -> Result<()>;

    /// Squash-merge and delete the remote branch.
    async fn merge_squash(&self, repo: &Path, number: u64) -> Result<()>;
}

/// Hosting service backed by the `gh` CLI.
pub struct GhCli {
    runner: CommandRunner,
}

impl GhCli {
    pub fn new() -> Self {
        Self {
            runner: CommandRunner::new(),
        }
    }
}

impl Default for GhCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostingService for GhCli {
    async fn find_open_pull_request(&self, repo: &Path, branch: &str) -> Result<Option<u64>> {
        let args: Vec<String> = [
            "pr", "list", "--head", branch, "--state", "open", "--json", "number", "--jq", ".[0].number",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let result = self.runner.program(repo, "gh", &args).await?;
        if !result.success() {
            return Err(NightshiftError::Publish(format!(
                "gh pr list failed for {}: {}",
                branch,
                result.combined_output()
            )));
        }
        Ok(result.stdout.trim().parse::<u64>().ok())
    }

    async fn create_pull_request(&self, repo: &Path, branch: &str, title: &str, body: &str, draft: bool) -> Result<u64> {
        let mut args: Vec<String> = vec![
            "pr".into(),
            "create".into(),
            "--head".into(),
            branch.into(),
            "--title".into(),
            title.into(),
            "--body".into(),
            body.into(),
        ];
        if draft {
            args.push("--draft".into());
        }
        let result = self.runner.program(repo, "gh", &args).await?;
        if !result.success() {
            return Err(NightshiftError::Publish(format!(
                "gh pr create failed for {}: {}",
                branch,
                result.combined_output()
            )));
        }
        // gh prints the PR URL; the trailing path segment is the number.
        parse_pr_number(result.stdout.trim()).ok_or_else(|| {
            NightshiftError::Publish(format!("could not read PR number from gh output: {}", result.stdout.trim()))
        })
    }

    async fn promote_from_draft(&self, repo: &Path, number: u64) -> Result<()> {
        let args: Vec<String> = vec!["pr".into(), "ready".into(), number.to_string()];
        let result = self.runner.program(repo, "gh", &args).await?;
        if !result.success() {
            return Err(NightshiftError::Publish(format!(
                "gh pr ready #{} failed: {}",
                number,
                result.combined_output()
            )));
        }
        Ok(())
    }

    async fn merge_squash(&self, repo: &Path, number: u64) -> Result<()> {
        let args: Vec<String> = vec![
            "pr".into(),
            "merge".into(),
            number.to_string(),
            "--squash".into(),
            "--delete-branch".into(),
        ];
        let result = self.runner.program(repo, "gh", &args).await?;
        if !result.success() {
            return Err(NightshiftError::Publish(format!(
                "gh pr merge #{} failed: {}",
                number,
                result.combined_output()
            )));
        }
        Ok(())
    }
}

/// Pull the PR number off the tail of a `gh pr create` URL.
fn parse_pr_number(url: &str) -> Option<u64> {
    url.rsplit('/').next()?.trim().parse().ok()
}

/// Toggles controlling how far publication goes.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub push: bool,
    pub create_pr: bool,
    pub draft: bool,
    pub auto_merge: bool,
    pub remote: String,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            push: true,
            create_pr: true,
            draft: false,
            auto_merge: false,
            remote: "origin".to_string(),
        }
    }
}

/// Publication controller for one run.
pub struct Publisher {
    hosting: Box<dyn HostingService>,
    runner: CommandRunner,
    options: PublishOptions,
}

impl Publisher {
    pub fn new(hosting: Box<dyn HostingService>, options: PublishOptions) -> Self {
        Self {
            hosting,
            runner: CommandRunner::new(),
            options,
        }
    }

    pub fn options(&self) -> &PublishOptions {
        &self.options
    }

    /// Push the branch from the workspace. Pushing a branch that already
    /// exists remotely with identical history succeeds ("everything
    /// up-to-date"), so a repeated push is not an error.
    pub async fn push(&self, workdir: &Path, branch: &str) -> Result<()> {
        let result = self
            .runner
            .git(workdir, &["push", &self.options.remote, branch])
            .await?;
        if !result.success() {
            return Err(NightshiftError::Publish(format!(
                "git push {} {} failed: {}",
                self.options.remote,
                branch,
                result.combined_output()
            )));
        }
        Ok(())
    }

    /// Idempotent find-or-create: an existing open request for the branch is
    /// returned as-is; creation happens only when none exists.
    pub async fn find_or_create_pull_request(&self, repo: &Path, branch: &str, title: &str, body: &str) -> Result<u64> {
        if let Some(number) = self.hosting.find_open_pull_request(repo, branch).await? {
            log::info!("found existing open PR #{} for {}", number, branch);
            return Ok(number);
        }
        let number = self
            .hosting
            .create_pull_request(repo, branch, title, body, self.options.draft)
            .await?;
        log::info!("created PR #{} for {}", number, branch);
        Ok(number)
    }

    /// Run publication for a cycle: push, find-or-create the PR, and merge
    /// at most once when allowed. Failures are recorded, never retried and
    /// never propagated — one bad publication must not block later cycles.
    pub async fn publish(&self, workdir: &Path, meta: &Meta, body: &str, merge_allowed: bool) -> PublicationRecord {
        let mut record = PublicationRecord {
            branch: meta.branch_name.clone(),
            pr_number: None,
            outcome: MergeOutcome::NotAttempted,
        };

        if !self.options.push {
            log::info!("push disabled; leaving branch {} local", meta.branch_name);
            return record;
        }

        if let Err(e) = self.push(workdir, &meta.branch_name).await {
            log::warn!("{}", e);
            record.outcome = MergeOutcome::Failed;
            return record;
        }

        if !self.options.create_pr {
            return record;
        }

        let number = match self
            .find_or_create_pull_request(workdir, &meta.branch_name, &meta.pr_title, body)
            .await
        {
            Ok(n) => n,
            Err(e) => {
                log::warn!("{}", e);
                record.outcome = MergeOutcome::Failed;
                return record;
            }
        };
        record.pr_number = Some(number);

        if !(self.options.auto_merge && merge_allowed) {
            return record;
        }

        if self.options.draft
            && let Err(e) = self.hosting.promote_from_draft(workdir, number).await
        {
            log::warn!("{}", e);
            record.outcome = MergeOutcome::Held;
            return record;
        }

        // One merge attempt, ever. A blocked merge is held for a human.
        match self.hosting.merge_squash(workdir, number).await {
            Ok(()) => {
                log::info!("merged PR #{} ({})", number, meta.branch_name);
                record.outcome = MergeOutcome::Merged;
            }
            Err(e) => {
                log::warn!("merge held for PR #{}: {}", number, e);
                record.outcome = MergeOutcome::Held;
            }
        }
        record
    }
}
