//! The stage pipeline: one cycle from research to merge.
//!
//! Stages run in a fixed order with no backward transitions. A hard failure
//! in planning aborts the cycle before anything is committed; a hard failure
//! in a later stage ends the cycle without publishing. Optional stages
//! (research, self-annotation, independent review) tolerate failure. On
//! every path the cycle leaves a human-readable result artifact and its
//! workspace is reclaimed.

use std::path::Path;

use crate::agent::AgentInvoker;
use crate::artifacts::{ArtifactStore, scratch_path};
use crate::config::Config;
use crate::cycle::{Cycle, CycleStatus, Meta, Stage, StageResult};
use crate::error::{NightshiftError, Result};
use crate::notify::Notifier;
use crate::process::CommandRunner;
use crate::prompts;
use crate::publish::Publisher;
use crate::verify::{CheckCatalog, VerificationLoop, run_checks};
use crate::workspace::{WorkspaceHandle, WorkspaceManager};

/// Diff size measured against the cycle's base commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffStats {
    pub files: u32,
    pub lines: u32,
}

/// Longest diff excerpt handed to the review prompt.
const REVIEW_DIFF_MAX_CHARS: usize = 24_000;

/// Drives one cycle through the fixed stage order.
pub struct CyclePipeline<'a> {
    config: &'a Config,
    store: ArtifactStore,
    invoker: &'a AgentInvoker,
    workspaces: &'a WorkspaceManager,
    publisher: &'a Publisher,
    notifier: &'a Notifier,
    catalog: CheckCatalog,
    runner: CommandRunner,
}

impl<'a> CyclePipeline<'a> {
    pub fn new(
        config: &'a Config,
        invoker: &'a AgentInvoker,
        workspaces: &'a WorkspaceManager,
        publisher: &'a Publisher,
        notifier: &'a Notifier,
    ) -> Self {
        Self {
            config,
            store: invoker.store().clone(),
            invoker,
            workspaces,
            publisher,
            notifier,
            catalog: CheckCatalog::new(
                config.checks.commands.clone(),
                config.checks.format_label.clone(),
                config.checks.format_fix.clone(),
            ),
            runner: CommandRunner::new(),
        }
    }

    /// Run one full cycle. Never returns an error: failures end up in the
    /// cycle's status, stages and result artifact.
    pub async fn run_cycle(&self, index: u32, cycle_id: &str, previous_result: &str, memory_context: &str) -> Cycle {
        let mut cycle = Cycle::new(index, cycle_id);
        log::info!("cycle {} ({}) starting", index, cycle_id);

        let handle = match self
            .workspaces
            .acquire(cycle_id, &self.config.repo.base_revision)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("cycle {}: {}", cycle_id, e);
                cycle.status = CycleStatus::Aborted;
                cycle.observe(format!("workspace acquisition failed: {}", e));
                self.ensure_result_artifact(&cycle);
                return cycle;
            }
        };

        if let Err(e) = self.drive(&mut cycle, &handle, previous_result, memory_context).await {
            log::warn!("cycle {} ended early: {}", cycle_id, e);
            cycle.status = CycleStatus::Aborted;
            cycle.observe(e.to_string());
        }

        self.ensure_result_artifact(&cycle);

        if self.config.run.retain_workspaces {
            log::info!("retaining workspace for cycle {} at {}", cycle_id, handle.path.display());
        } else {
            self.workspaces.release(&handle).await;
        }

        self.notifier
            .send(
                &format!("cycle {} {}", cycle_id, cycle.status),
                &format!(
                    "branch: {}\nretries: {}\npublication: {}",
                    cycle.branch().unwrap_or("(none)"),
                    cycle.retries,
                    cycle.publication.outcome.as_str()
                ),
            )
            .await;

        log::info!("cycle {} finished: {}", cycle_id, cycle.status);
        cycle
    }

    /// The stage sequence. Returns `Err` only for hard failures; tolerant
    /// stages record their own notes and keep going.
    async fn drive(
        &self,
        cycle: &mut Cycle,
        handle: &WorkspaceHandle,
        previous_result: &str,
        memory_context: &str,
    ) -> Result<()> {
        let ws = handle.path.as_path();
        let cycle_id = cycle.id.clone();

        // ── 1. Research (tolerant) ────────────────────────────────────────
        let research = self.stage_research(cycle, ws, memory_context).await;

        // ── 2. Plan (hard) ───────────────────────────────────────────────
        let meta = self.stage_plan(cycle, ws, &research, previous_result, memory_context).await?;
        cycle.meta = Some(meta);

        // ── 3. Self-annotation (tolerant) ────────────────────────────────
        self.stage_annotate(cycle, ws).await;
        let Some(meta) = cycle.meta.clone() else {
            return Err(NightshiftError::stage("plan", "meta record lost after annotation"));
        };

        // ── 4. Implement ─────────────────────────────────────────────────
        self.stage_implement(cycle, handle, &meta).await?;

        // ── 5. Verify and heal ───────────────────────────────────────────
        let verification = VerificationLoop::new(self.invoker, &self.catalog, self.config.checks.max_retries)
            .run(&cycle_id, ws, &meta.tests_to_run)
            .await?;
        cycle.retries = verification.retries;
        if verification.passed {
            cycle.status = CycleStatus::Succeeded;
            cycle.record_stage(StageResult::ok(Stage::Verify).with_note(format!("passed after {} retries", verification.retries)));
        } else {
            cycle.status = CycleStatus::TestsFailed;
            cycle.record_stage(StageResult::failed(
                Stage::Verify,
                format!("retries exhausted ({})", verification.retries),
            ));
            cycle.observe("verification retries exhausted; published for human review".to_string());
            self.notifier
                .send(&format!("cycle {} degraded", cycle_id), "verification retries exhausted")
                .await;
        }

        // ── 6. Independent review (tolerant) ─────────────────────────────
        let stats = self.measure_diff(ws, &handle.base_commit).await?;
        let constraint_notes = self.constraint_notes(cycle, stats);
        let review = self.stage_review(cycle, handle, &constraint_notes).await;

        // ── 7. Evidence (deterministic) ──────────────────────────────────
        let evidence = self.stage_evidence(cycle, handle, &meta, stats).await?;

        // ── 8. Summarize ─────────────────────────────────────────────────
        let result_text = self.stage_summarize(cycle, ws, &review, &evidence).await;
        self.store.write(&ArtifactStore::result_name(&cycle_id), &result_text)?;

        // ── 9/10. Publish and merge ──────────────────────────────────────
        let record = self
            .publisher
            .publish(ws, &meta, &result_text, cycle.safe_to_publish())
            .await;
        let publish_ok = record.pr_number.is_some() || !self.config.publish.push || !self.config.publish.create_pr;
        cycle.record_stage(if publish_ok {
            StageResult::ok(Stage::Publish).with_note(match record.pr_number {
                Some(n) => format!("PR #{}", n),
                None => "publication disabled".to_string(),
            })
        } else {
            StageResult::failed(Stage::Publish, "push or PR creation failed")
        });
        cycle.record_stage(
            StageResult::ok(Stage::Merge).with_note(format!("merge outcome: {}", record.outcome.as_str())),
        );
        cycle.publication = record;

        Ok(())
    }

    // ── Individual stages ────────────────────────────────────────────────

    async fn stage_research(&self, cycle: &mut Cycle, ws: &Path, memory_context: &str) -> String {
        let prompt = prompts::research(&self.config.run.goal, memory_context);
        match self
            .invoker
            .invoke(Stage::Research.as_str(), &cycle.id, ws, &prompt, &[])
            .await
        {
            Ok(transcript) => {
                let findings = read_scratch(ws, "research.md");
                let mut result = StageResult::ok(Stage::Research).with_transcript(transcript.transcript_path);
                if findings.is_empty() {
                    result = result.with_note("no findings file; continuing with empty findings");
                } else if let Ok(path) = self.store.write(&ArtifactStore::research_name(&cycle.id), &findings) {
                    result = result.with_artifact(path);
                }
                cycle.record_stage(result);
                findings
            }
            Err(e) => {
                // Research quality is advisory, not load-bearing.
                log::warn!("research stage tolerated failure: {}", e);
                cycle.record_stage(StageResult::failed(Stage::Research, e.to_string()));
                String::new()
            }
        }
    }

    async fn stage_plan(
        &self,
        cycle: &mut Cycle,
        ws: &Path,
        research: &str,
        previous_result: &str,
        memory_context: &str,
    ) -> Result<Meta> {
        let prompt = prompts::plan(
            &self.config.run.goal,
            &cycle.id,
            &crate::id::branch_prefix(&cycle.id),
            research,
            previous_result,
            memory_context,
        );
        let expected = [scratch_path(ws, "plan-next.md"), scratch_path(ws, "meta.json")];
        let transcript = self
            .invoker
            .invoke(Stage::Plan.as_str(), &cycle.id, ws, &prompt, &expected)
            .await
            .inspect_err(|_| {
                cycle.record_stage(StageResult::failed(Stage::Plan, "plan or meta artifact missing"));
            })?;

        let plan_text = read_scratch(ws, "plan-next.md");
        let meta_raw = read_scratch(ws, "meta.json");
        let meta = Meta::from_json(&meta_raw).inspect_err(|e| {
            cycle.record_stage(StageResult::failed(Stage::Plan, e.to_string()));
        })?;

        let plan_path = self.store.write(&ArtifactStore::plan_name(&cycle.id), &plan_text)?;
        let meta_path = self.store.write(&ArtifactStore::meta_name(&cycle.id), &meta_raw)?;
        cycle.record_stage(
            StageResult::ok(Stage::Plan)
                .with_transcript(transcript.transcript_path)
                .with_artifact(plan_path)
                .with_artifact(meta_path)
                .with_note(format!("branch {}", meta.branch_name)),
        );
        Ok(meta)
    }

    /// Refinement pass: the agent may rewrite plan and meta in place. An
    /// invalid rewrite is discarded and the original plan stands.
    async fn stage_annotate(&self, cycle: &mut Cycle, ws: &Path) {
        let plan_text = read_scratch(ws, "plan-next.md");
        let meta_before = read_scratch(ws, "meta.json");
        let prompt = prompts::annotate(&plan_text, &meta_before);

        match self
            .invoker
            .invoke(Stage::Annotate.as_str(), &cycle.id, ws, &prompt, &[])
            .await
        {
            Ok(transcript) => {
                let meta_after = read_scratch(ws, "meta.json");
                let mut result = StageResult::ok(Stage::Annotate).with_transcript(transcript.transcript_path);
                if meta_after != meta_before {
                    match Meta::from_json(&meta_after) {
                        Ok(meta) => {
                            let plan_after = read_scratch(ws, "plan-next.md");
                            let _ = self.store.write(&ArtifactStore::plan_name(&cycle.id), &plan_after);
                            let _ = self.store.write(&ArtifactStore::meta_name(&cycle.id), &meta_after);
                            cycle.meta = Some(meta);
                            result = result.with_note("plan refined");
                        }
                        Err(e) => {
                            log::warn!("annotation rewrote meta invalidly, keeping original: {}", e);
                            let _ = std::fs::write(scratch_path(ws, "meta.json"), &meta_before);
                            let _ = std::fs::write(scratch_path(ws, "plan-next.md"), &plan_text);
                            result = result.with_note("invalid rewrite discarded; original plan stands");
                        }
                    }
                }
                cycle.record_stage(result);
            }
            Err(e) => {
                log::warn!("annotation stage tolerated failure: {}", e);
                cycle.record_stage(StageResult::failed(Stage::Annotate, e.to_string()));
            }
        }
    }

    async fn stage_implement(&self, cycle: &mut Cycle, handle: &WorkspaceHandle, meta: &Meta) -> Result<()> {
        let ws = handle.path.as_path();
        let plan_text = read_scratch(ws, "plan-next.md");
        let prompt = prompts::implement(
            &plan_text,
            meta,
            self.config.limits.max_diff_lines,
            self.config.limits.max_files,
        );
        let transcript = self
            .invoker
            .invoke(Stage::Implement.as_str(), &cycle.id, ws, &prompt, &[])
            .await
            .inspect_err(|e| {
                cycle.record_stage(StageResult::failed(Stage::Implement, e.to_string()));
            })?;

        // No file contract here; the repository state is the signal.
        let branch = self.workspaces.current_branch(ws).await?;
        let commits = self.workspaces.commits_since(ws, &handle.base_commit).await?;
        if branch.as_deref() != Some(meta.branch_name.as_str()) {
            cycle.record_stage(StageResult::failed(Stage::Implement, "workspace not on planned branch"));
            return Err(NightshiftError::stage(
                "implement",
                format!(
                    "expected branch '{}', workspace is on '{}'",
                    meta.branch_name,
                    branch.as_deref().unwrap_or("(detached)")
                ),
            ));
        }
        if commits == 0 {
            cycle.record_stage(StageResult::failed(Stage::Implement, "agent made no commit"));
            return Err(NightshiftError::stage("implement", "no commit beyond base revision"));
        }

        cycle.record_stage(
            StageResult::ok(Stage::Implement)
                .with_transcript(transcript.transcript_path)
                .with_note(format!("{} commit(s) on {}", commits, meta.branch_name)),
        );
        Ok(())
    }

    async fn stage_review(&self, cycle: &mut Cycle, handle: &WorkspaceHandle, constraint_notes: &[String]) -> String {
        let ws = handle.path.as_path();
        let diff = match self
            .runner
            .git(ws, &["diff", &format!("{}..HEAD", handle.base_commit)])
            .await
        {
            Ok(result) if result.success() => truncate_chars(&result.stdout, REVIEW_DIFF_MAX_CHARS),
            _ => String::new(),
        };

        let prompt = prompts::review(&diff, constraint_notes);
        match self
            .invoker
            .invoke(Stage::Review.as_str(), &cycle.id, ws, &prompt, &[])
            .await
        {
            Ok(transcript) => {
                let review = read_scratch(ws, "review.md");
                let mut result = StageResult::ok(Stage::Review).with_transcript(transcript.transcript_path);
                if review.is_empty() {
                    log::info!("cycle {}: no review file", cycle.id);
                    result = result.with_note("no review file");
                } else if let Ok(path) = self.store.write(&ArtifactStore::review_name(&cycle.id), &review) {
                    result = result.with_artifact(path);
                }
                cycle.record_stage(result);
                review
            }
            Err(e) => {
                log::warn!("review stage tolerated failure: {}", e);
                cycle.record_stage(StageResult::failed(Stage::Review, e.to_string()));
                String::new()
            }
        }
    }

    /// The only stage guaranteed reproducible: no agent, just captured
    /// command output.
    async fn stage_evidence(
        &self,
        cycle: &mut Cycle,
        handle: &WorkspaceHandle,
        meta: &Meta,
        stats: DiffStats,
    ) -> Result<String> {
        let ws = handle.path.as_path();
        let mut evidence = format!("# Evidence for cycle {}\n\n", cycle.id);

        let range = format!("{}..HEAD", handle.base_commit);
        for (title, args) in [
            ("git status", vec!["status", "--porcelain"]),
            ("commits", vec!["log", "--oneline", range.as_str()]),
            ("diff stat", vec!["diff", "--stat", range.as_str()]),
        ] {
            let result = self.runner.git(ws, &args).await?;
            evidence.push_str(&format!("## {}\n\n```\n{}\n```\n\n", title, result.combined_output()));
        }

        evidence.push_str(&format!(
            "## Constraints\n\n- changed files: {} (max {})\n- changed lines: {} (max {})\n\n",
            stats.files, self.config.limits.max_files, stats.lines, self.config.limits.max_diff_lines
        ));

        let checks = self.catalog.resolve(&meta.tests_to_run);
        let runs = run_checks(&self.runner, ws, &checks).await?;
        for run in &runs {
            evidence.push_str(&format!(
                "## check `{}` ({})\n\n```\n{}\n```\n\n",
                run.label,
                if run.passed { "pass" } else { "FAIL" },
                run.output
            ));
        }

        let path = self.store.write(&ArtifactStore::evidence_name(&cycle.id), &evidence)?;
        cycle.record_stage(StageResult::ok(Stage::Evidence).with_artifact(path));
        Ok(evidence)
    }

    async fn stage_summarize(&self, cycle: &mut Cycle, ws: &Path, review: &str, evidence: &str) -> String {
        let plan_text = read_scratch(ws, "plan-next.md");
        let test_status = match cycle.status {
            CycleStatus::Succeeded => format!("passing (after {} retries)", cycle.retries),
            CycleStatus::TestsFailed => format!("FAILING after {} retries", cycle.retries),
            _ => "unknown".to_string(),
        };
        let prompt = prompts::summarize(&plan_text, evidence, review, &test_status);

        match self
            .invoker
            .invoke(Stage::Summarize.as_str(), &cycle.id, ws, &prompt, &[])
            .await
        {
            Ok(transcript) => {
                let result_text = read_scratch(ws, "result.md");
                if result_text.is_empty() {
                    cycle.record_stage(
                        StageResult::ok(Stage::Summarize)
                            .with_transcript(transcript.transcript_path)
                            .with_note("no result file; placeholder substituted"),
                    );
                    self.placeholder_result(cycle)
                } else {
                    cycle.record_stage(StageResult::ok(Stage::Summarize).with_transcript(transcript.transcript_path));
                    result_text
                }
            }
            Err(e) => {
                log::warn!("summarize stage tolerated failure: {}", e);
                cycle.record_stage(StageResult::failed(Stage::Summarize, e.to_string()));
                self.placeholder_result(cycle)
            }
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    /// Diff size vs the base commit: changed files and changed lines.
    async fn measure_diff(&self, ws: &Path, base_commit: &str) -> Result<DiffStats> {
        let range = format!("{}..HEAD", base_commit);
        let names = self.runner.git(ws, &["diff", "--name-only", &range]).await?;
        let files = names.stdout.lines().filter(|l| !l.trim().is_empty()).count() as u32;

        let numstat = self.runner.git(ws, &["diff", "--numstat", &range]).await?;
        let lines = numstat
            .stdout
            .lines()
            .map(|line| {
                let mut cols = line.split_whitespace();
                let added: u32 = cols.next().and_then(|c| c.parse().ok()).unwrap_or(0);
                let removed: u32 = cols.next().and_then(|c| c.parse().ok()).unwrap_or(0);
                added + removed
            })
            .sum();

        Ok(DiffStats { files, lines })
    }

    fn constraint_notes(&self, cycle: &mut Cycle, stats: DiffStats) -> Vec<String> {
        let mut notes = Vec::new();
        if stats.lines > self.config.limits.max_diff_lines {
            notes.push(format!(
                "diff has {} changed lines, limit {}",
                stats.lines, self.config.limits.max_diff_lines
            ));
        }
        if stats.files > self.config.limits.max_files {
            notes.push(format!("diff touches {} files, limit {}", stats.files, self.config.limits.max_files));
        }
        for note in &notes {
            log::warn!("cycle {}: constraint breach: {}", cycle.id, note);
            cycle.observe(format!("constraint breach: {}", note));
        }
        notes
    }

    /// Fallback result text: every cycle must leave a legible trail.
    fn placeholder_result(&self, cycle: &Cycle) -> String {
        format!(
            "# Result for cycle {}\n\n\
             - status: {}\n\
             - branch: {}\n\
             - intended change: {}\n\
             - verification retries: {}\n\
             - safe to publish without review: {}\n\n\
             {}\n",
            cycle.id,
            cycle.status,
            cycle.branch().unwrap_or("(none)"),
            cycle.meta.as_ref().map(|m| m.pr_title.as_str()).unwrap_or("(no plan produced)"),
            cycle.retries,
            if cycle.safe_to_publish() { "yes" } else { "no" },
            if cycle.observations.is_empty() {
                String::new()
            } else {
                format!("Observations:\n{}", cycle.observations.iter().map(|o| format!("- {}\n", o)).collect::<String>())
            }
        )
    }

    /// Guarantee the result artifact exists, whatever happened.
    fn ensure_result_artifact(&self, cycle: &Cycle) {
        let name = ArtifactStore::result_name(&cycle.id);
        if !self.store.exists(&name)
            && let Err(e) = self.store.write(&name, &self.placeholder_result(cycle))
        {
            log::error!("could not write result artifact for {}: {}", cycle.id, e);
        }
    }
}

fn read_scratch(ws: &Path, file: &str) -> String {
    std::fs::read_to_string(scratch_path(ws, file)).unwrap_or_default()
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max).collect();
        out.push_str("\n... (truncated)");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::process::ExecResult;
    use crate::publish::{GhCli, PublishOptions};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::process::Command;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Fake agent that runs one scripted shell command per invocation, in
    /// order. Exhausted scripts fall back to a no-op.
    struct ScriptedAgent {
        scripts: Mutex<VecDeque<String>>,
    }

    impl ScriptedAgent {
        fn new(scripts: &[&str]) -> Self {
            Self {
                scripts: Mutex::new(scripts.iter().map(|s| s.to_string()).collect()),
            }
        }
    }

    #[async_trait]
    impl Agent for ScriptedAgent {
        async fn run(&self, workdir: &Path, _prompt: &str) -> crate::error::Result<ExecResult> {
            let script = self.scripts.lock().unwrap().pop_front().unwrap_or_else(|| "true".to_string());
            CommandRunner::new().shell(workdir, &script).await
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    struct Fixture {
        _temp: TempDir,
        config: Config,
        invoker: AgentInvoker,
        workspaces: WorkspaceManager,
        publisher: Publisher,
        notifier: Notifier,
    }

    impl Fixture {
        fn pipeline(&self) -> CyclePipeline<'_> {
            CyclePipeline::new(&self.config, &self.invoker, &self.workspaces, &self.publisher, &self.notifier)
        }
    }

    fn setup_repo(path: &Path) {
        std::fs::create_dir_all(path).unwrap();
        for args in [
            vec!["init", "-b", "main"],
            vec!["config", "user.email", "t@t.t"],
            vec!["config", "user.name", "T"],
        ] {
            Command::new("git").args(&args).current_dir(path).output().unwrap();
        }
        std::fs::write(path.join("README.md"), "# repo").unwrap();
        Command::new("git").args(["add", "."]).current_dir(path).output().unwrap();
        Command::new("git")
            .args(["commit", "-m", "init"])
            .current_dir(path)
            .output()
            .unwrap();
    }

    fn fixture(scripts: &[&str]) -> Fixture {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("repo");
        setup_repo(&repo);

        let mut config = Config::default();
        config.repo.root = repo.clone();
        config.publish.push = false;
        config.checks.commands = [
            ("lint".to_string(), "true".to_string()),
            ("test".to_string(), "true".to_string()),
        ]
        .into();
        config.checks.baseline = vec![];

        let store = ArtifactStore::open(temp.path().join("logs")).unwrap();
        let invoker = AgentInvoker::new(Box::new(ScriptedAgent::new(scripts)), store);
        let workspaces = WorkspaceManager::new(&repo, temp.path().join("workspaces"));
        let publisher = Publisher::new(
            Box::new(GhCli::new()),
            PublishOptions {
                push: false,
                ..PublishOptions::default()
            },
        );

        Fixture {
            _temp: temp,
            config,
            invoker,
            workspaces,
            publisher,
            notifier: Notifier::disabled(),
        }
    }

    const WRITE_PLAN: &str = r#"mkdir -p .nightshift && printf 'do the fix' > .nightshift/plan-next.md && printf '{"branch_name":"cycle-1-fix","pr_title":"fix: x","commit_message":"fix: x","tests_to_run":["lint","test"],"notes":""}' > .nightshift/meta.json"#;

    const IMPLEMENT: &str = "git checkout -b cycle-1-fix && echo fixed > fix.txt && git add fix.txt && git commit -m 'fix: x'";

    #[tokio::test]
    async fn test_happy_path_cycle_succeeds() {
        let fixture = fixture(&[
            "printf 'nothing notable' > .nightshift/research.md", // research
            WRITE_PLAN,                                           // plan
            "true",                                               // annotate (no rewrite)
            IMPLEMENT,                                            // implement
            "printf 'looks good' > .nightshift/review.md",        // review
            "printf 'shipped the fix' > .nightshift/result.md",   // summarize
        ]);
        let pipeline = fixture.pipeline();

        let cycle = pipeline.run_cycle(1, "c1", "", "").await;
        assert_eq!(cycle.status, CycleStatus::Succeeded);
        assert_eq!(cycle.retries, 0);
        assert_eq!(cycle.branch(), Some("cycle-1-fix"));

        // Artifacts are all in place
        let store = fixture.invoker.store();
        assert!(store.exists("research-c1.md"));
        assert!(store.exists("plan-next-c1.md"));
        assert!(store.exists("meta-c1.json"));
        assert!(store.exists("review-c1.md"));
        assert!(store.exists("evidence-c1.md"));
        assert_eq!(store.read("result-c1.md").unwrap(), "shipped the fix");

        // Workspace reclaimed
        assert!(!fixture.workspaces.path_for("c1").exists());
    }

    #[tokio::test]
    async fn test_valid_meta_proceeds_past_plan() {
        let fixture = fixture(&["true", WRITE_PLAN, "true", IMPLEMENT]);
        let pipeline = fixture.pipeline();

        let cycle = pipeline.run_cycle(1, "c1", "", "").await;
        let plan_stage = cycle.stages.iter().find(|s| s.stage == Stage::Plan).unwrap();
        assert!(plan_stage.ok);
        assert!(cycle.meta.is_some());
        assert_ne!(cycle.status, CycleStatus::Aborted);
    }

    #[tokio::test]
    async fn test_missing_meta_aborts_cycle() {
        // Plan stage writes nothing at all
        let fixture = fixture(&["true", "true"]);
        let pipeline = fixture.pipeline();

        let cycle = pipeline.run_cycle(1, "c1", "", "").await;
        assert_eq!(cycle.status, CycleStatus::Aborted);
        assert!(cycle.meta.is_none());
        assert_eq!(cycle.publication.pr_number, None);

        // Workspace reclaimed even on the failure path
        assert!(!fixture.workspaces.path_for("c1").exists());
        // A legible result artifact still exists
        let result = fixture.invoker.store().read("result-c1.md").unwrap();
        assert!(result.contains("aborted"));
        assert!(result.contains("no"));
    }

    #[tokio::test]
    async fn test_incomplete_meta_aborts_cycle() {
        let bad_plan = r#"mkdir -p .nightshift && printf 'plan' > .nightshift/plan-next.md && printf '{"branch_name":"","pr_title":"t","commit_message":"m","tests_to_run":["test"]}' > .nightshift/meta.json"#;
        let fixture = fixture(&["true", bad_plan]);
        let pipeline = fixture.pipeline();

        let cycle = pipeline.run_cycle(1, "c1", "", "").await;
        assert_eq!(cycle.status, CycleStatus::Aborted);
    }

    #[tokio::test]
    async fn test_implement_without_commit_aborts() {
        // Agent creates the branch but never commits
        let fixture = fixture(&["true", WRITE_PLAN, "true", "git checkout -b cycle-1-fix"]);
        let pipeline = fixture.pipeline();

        let cycle = pipeline.run_cycle(1, "c1", "", "").await;
        assert_eq!(cycle.status, CycleStatus::Aborted);
        let implement = cycle.stages.iter().find(|s| s.stage == Stage::Implement).unwrap();
        assert!(!implement.ok);
    }

    #[tokio::test]
    async fn test_implement_on_wrong_branch_aborts() {
        let fixture = fixture(&[
            "true",
            WRITE_PLAN,
            "true",
            "git checkout -b some-other-branch && echo x > f && git add f && git commit -m x",
        ]);
        let pipeline = fixture.pipeline();

        let cycle = pipeline.run_cycle(1, "c1", "", "").await;
        assert_eq!(cycle.status, CycleStatus::Aborted);
    }

    #[tokio::test]
    async fn test_exhausted_retries_degrade_but_continue() {
        let mut fixture = fixture(&[
            "true", WRITE_PLAN, "true", IMPLEMENT,
            // verify-fix attempts are no-ops; checks keep failing
        ]);
        fixture.config.checks.commands.insert("test".to_string(), "false".to_string());
        let pipeline = fixture.pipeline();

        let cycle = pipeline.run_cycle(1, "c1", "", "").await;
        assert_eq!(cycle.status, CycleStatus::TestsFailed);
        assert_eq!(cycle.retries, 3);
        assert!(!cycle.safe_to_publish());

        // Pipeline kept going: evidence and result exist, publish stage ran
        let store = fixture.invoker.store();
        assert!(store.exists("evidence-c1.md"));
        assert!(store.exists("result-c1.md"));
        assert!(cycle.stages.iter().any(|s| s.stage == Stage::Publish));
    }

    #[tokio::test]
    async fn test_tolerated_research_failure() {
        let fixture = fixture(&["exit 1", WRITE_PLAN, "true", IMPLEMENT]);
        let pipeline = fixture.pipeline();

        let cycle = pipeline.run_cycle(1, "c1", "", "").await;
        assert_ne!(cycle.status, CycleStatus::Aborted);
        let research = cycle.stages.iter().find(|s| s.stage == Stage::Research).unwrap();
        assert!(!research.ok);
    }

    #[tokio::test]
    async fn test_annotation_rewrite_is_revalidated() {
        let rewrite_invalid = r#"printf '{"branch_name":"","pr_title":"","commit_message":"","tests_to_run":[]}' > .nightshift/meta.json"#;
        let fixture = fixture(&["true", WRITE_PLAN, rewrite_invalid, IMPLEMENT]);
        let pipeline = fixture.pipeline();

        let cycle = pipeline.run_cycle(1, "c1", "", "").await;
        // Invalid rewrite discarded; original meta survived and the cycle ran
        assert_eq!(cycle.branch(), Some("cycle-1-fix"));
        assert_ne!(cycle.status, CycleStatus::Aborted);
        let annotate = cycle.stages.iter().find(|s| s.stage == Stage::Annotate).unwrap();
        assert!(annotate.note.contains("discarded"));
    }

    #[tokio::test]
    async fn test_annotation_valid_rewrite_applies() {
        let rewrite = r#"printf '{"branch_name":"cycle-1-fix","pr_title":"fix: x (narrowed)","commit_message":"fix: x","tests_to_run":["test"]}' > .nightshift/meta.json"#;
        let fixture = fixture(&["true", WRITE_PLAN, rewrite, IMPLEMENT]);
        let pipeline = fixture.pipeline();

        let cycle = pipeline.run_cycle(1, "c1", "", "").await;
        assert_eq!(cycle.meta.as_ref().unwrap().pr_title, "fix: x (narrowed)");
    }

    #[tokio::test]
    async fn test_missing_review_is_tolerated() {
        let fixture = fixture(&["true", WRITE_PLAN, "true", IMPLEMENT, "true", "true"]);
        let pipeline = fixture.pipeline();

        let cycle = pipeline.run_cycle(1, "c1", "", "").await;
        assert_eq!(cycle.status, CycleStatus::Succeeded);
        let review = cycle.stages.iter().find(|s| s.stage == Stage::Review).unwrap();
        assert_eq!(review.note, "no review file");
        assert!(!fixture.invoker.store().exists("review-c1.md"));
    }

    #[tokio::test]
    async fn test_missing_summary_gets_placeholder() {
        let fixture = fixture(&["true", WRITE_PLAN, "true", IMPLEMENT, "true", "true"]);
        let pipeline = fixture.pipeline();

        let cycle = pipeline.run_cycle(1, "c1", "", "").await;
        let result = fixture.invoker.store().read("result-c1.md").unwrap();
        assert!(result.contains("cycle-1-fix"));
        assert!(result.contains("succeeded"));
        assert!(result.contains("safe to publish without review: yes"));
        assert_eq!(cycle.status, CycleStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_constraint_breach_is_observed_not_fatal() {
        let mut fixture = fixture(&["true", WRITE_PLAN, "true", IMPLEMENT, "true", "true"]);
        fixture.config.limits.max_files = 0;
        fixture.config.limits.max_diff_lines = 0;
        let pipeline = fixture.pipeline();

        let cycle = pipeline.run_cycle(1, "c1", "", "").await;
        assert_eq!(cycle.status, CycleStatus::Succeeded);
        assert!(cycle.observations.iter().any(|o| o.contains("constraint breach")));
        let evidence = fixture.invoker.store().read("evidence-c1.md").unwrap();
        assert!(evidence.contains("changed files: 1 (max 0)"));
    }

    #[tokio::test]
    async fn test_evidence_captures_check_output() {
        let fixture = fixture(&["true", WRITE_PLAN, "true", IMPLEMENT, "true", "true"]);
        let pipeline = fixture.pipeline();

        pipeline.run_cycle(1, "c1", "", "").await;
        let evidence = fixture.invoker.store().read("evidence-c1.md").unwrap();
        assert!(evidence.contains("## check `lint` (pass)"));
        assert!(evidence.contains("## check `test` (pass)"));
        assert!(evidence.contains("## commits"));
        assert!(evidence.contains("fix: x"));
    }

    #[tokio::test]
    async fn test_retained_workspace_survives() {
        let mut fixture = fixture(&["true", WRITE_PLAN, "true", IMPLEMENT]);
        fixture.config.run.retain_workspaces = true;
        let pipeline = fixture.pipeline();

        pipeline.run_cycle(1, "c1", "", "").await;
        assert!(fixture.workspaces.path_for("c1").exists());
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abc", 5), "abc");
        let long = "x".repeat(10);
        let truncated = truncate_chars(&long, 5);
        assert!(truncated.starts_with("xxxxx"));
        assert!(truncated.ends_with("(truncated)"));
    }
}
