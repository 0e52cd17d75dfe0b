//! The outer loop: baseline check, then N sequential cycles.
//!
//! Strictly one cycle at a time; a started cycle runs to its natural
//! conclusion. Interruption is coarse — a flag checked at the top of each
//! iteration — and one bad cycle never aborts the run.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;

use crate::agent::{AgentInvoker, CliAgent};
use crate::artifacts::ArtifactStore;
use crate::config::Config;
use crate::cycle::{Cycle, CycleStatus, MergeOutcome};
use crate::error::{NightshiftError, Result};
use crate::id::{generate_cycle_id, generate_run_id};
use crate::memory::{self, MemoryCategory, MemoryLog, MemoryRecord};
use crate::notify::Notifier;
use crate::pipeline::CyclePipeline;
use crate::process::CommandRunner;
use crate::publish::{GhCli, PublishOptions, Publisher};
use crate::report::Reporter;
use crate::verify::{CheckCatalog, run_checks};
use crate::workspace::WorkspaceManager;

/// What a finished run looked like.
#[derive(Debug)]
pub struct RunSummary {
    pub run_id: String,
    pub cycles: Vec<Cycle>,
}

impl RunSummary {
    pub fn count(&self, status: CycleStatus) -> usize {
        self.cycles.iter().filter(|c| c.status == status).count()
    }

    pub fn merged(&self) -> usize {
        self.cycles
            .iter()
            .filter(|c| c.publication.outcome == MergeOutcome::Merged)
            .count()
    }
}

/// Drives the configured number of cycles, then reports.
pub struct Scheduler {
    config: Config,
    interrupt: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked between cycles; set it (e.g. from a Ctrl-C handler) to
    /// stop the loop after the current cycle.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    fn memory_path(&self) -> PathBuf {
        self.config.storage.log_root.join("memory.jsonl")
    }

    fn patterns_path(&self) -> PathBuf {
        self.config.storage.log_root.join(ArtifactStore::patterns_name())
    }

    /// Pre-loop baseline: configuration problems are fatal; a red check run
    /// on the primary copy is recorded and notified but does not stop the
    /// loop — fixing it may be exactly what the cycles are for.
    pub async fn baseline(&self, notifier: &Notifier, memory: &MemoryLog) -> Result<()> {
        let root = &self.config.repo.root;
        if !root.is_dir() {
            return Err(NightshiftError::Config(format!(
                "repository root {} does not exist",
                root.display()
            )));
        }
        for file in &self.config.repo.required_files {
            if !root.join(file).exists() {
                return Err(NightshiftError::Config(format!(
                    "required repository file missing: {}",
                    file
                )));
            }
        }

        // The workspace provider must be reachable and the base revision real.
        let workspaces = WorkspaceManager::new(root, &self.config.storage.workspace_base);
        workspaces
            .resolve_revision(&self.config.repo.base_revision)
            .await
            .map_err(|e| NightshiftError::Config(format!("workspace provider check failed: {}", e)))?;

        if self.config.checks.baseline.is_empty() {
            return Ok(());
        }
        let catalog = CheckCatalog::new(
            self.config.checks.commands.clone(),
            self.config.checks.format_label.clone(),
            self.config.checks.format_fix.clone(),
        );
        let checks = catalog.resolve(&self.config.checks.baseline);
        let runs = run_checks(&CommandRunner::new(), root, &checks).await?;
        for run in runs.iter().filter(|r| !r.passed) {
            log::warn!("baseline check '{}' failing on the primary copy", run.label);
            notifier
                .send("baseline check failing", &format!("check '{}' is red before any cycle", run.label))
                .await;
            memory.append(&MemoryRecord::new(
                MemoryCategory::Lesson,
                "baseline",
                format!("check '{}' was already failing before the run started", run.label),
            ))?;
        }
        Ok(())
    }

    /// Run the whole session: baseline, cycles, reports.
    pub async fn run(&self) -> Result<RunSummary> {
        let started = Utc::now();
        let run_id = generate_run_id();
        log::info!("starting {} ({} cycle(s) max)", run_id, self.config.run.max_cycles);

        let store = ArtifactStore::open(self.config.storage.log_root.join(&run_id))?;
        let memory = MemoryLog::new(self.memory_path());
        let notifier = Notifier::new(self.config.notify.endpoint.clone());

        self.baseline(&notifier, &memory).await?;

        let mut agent = CliAgent::new(self.config.agent.program.clone(), self.config.agent.args.clone());
        if self.config.agent.timeout_ms > 0 {
            agent = agent.with_timeout_ms(self.config.agent.timeout_ms);
        }
        let invoker = AgentInvoker::new(Box::new(agent), store.clone());
        let workspaces = WorkspaceManager::new(&self.config.repo.root, &self.config.storage.workspace_base);
        let publisher = Publisher::new(
            Box::new(GhCli::new()),
            PublishOptions {
                push: self.config.publish.push,
                create_pr: self.config.publish.create_pr,
                draft: self.config.publish.draft,
                auto_merge: self.config.publish.auto_merge,
                remote: self.config.publish.remote.clone(),
            },
        );
        let pipeline = CyclePipeline::new(&self.config, &invoker, &workspaces, &publisher, &notifier);

        notifier
            .send(&format!("{} starting", run_id), &format!("{} cycle(s) planned", self.config.run.max_cycles))
            .await;

        let mut cycles: Vec<Cycle> = Vec::new();
        let mut previous_result = String::new();

        for index in 1..=self.config.run.max_cycles {
            if self.interrupt.load(Ordering::Acquire) {
                log::info!("interrupted; stopping before cycle {}", index);
                break;
            }

            let cycle_id = generate_cycle_id(started, index);
            let memory_context = memory
                .load_recent(self.config.run.memory_context_records)
                .map(|records| memory::format_for_prompt(&records))
                .unwrap_or_default();

            let cycle = pipeline.run_cycle(index, &cycle_id, &previous_result, &memory_context).await;

            // The only cross-cycle reads: this result and the memory log.
            previous_result = store.read_or_empty(&ArtifactStore::result_name(&cycle_id));
            self.remember(&memory, &cycle);
            if let Ok(json) = serde_json::to_string_pretty(&cycle) {
                let _ = store.write(&Reporter::cycle_record_name(&cycle_id), &json);
            }
            cycles.push(cycle);

            if index < self.config.run.max_cycles && !self.interrupt.load(Ordering::Acquire) {
                tokio::time::sleep(std::time::Duration::from_secs(self.config.run.sleep_secs)).await;
            }
        }

        let reporter = Reporter::new(&store);
        reporter.write_run_report(&run_id, &cycles)?;
        reporter.write_next_session_plan(&run_id, &cycles)?;
        let records = memory.load_recent(200)?;
        reporter.write_patterns(&self.patterns_path(), &records)?;

        let summary = RunSummary { run_id, cycles };
        notifier
            .send(
                &format!("{} finished", summary.run_id),
                &format!(
                    "{} succeeded, {} tests-failed, {} aborted, {} merged",
                    summary.count(CycleStatus::Succeeded),
                    summary.count(CycleStatus::TestsFailed),
                    summary.count(CycleStatus::Aborted),
                    summary.merged(),
                ),
            )
            .await;
        Ok(summary)
    }

    /// Distill a finished cycle into the append-only memory log.
    fn remember(&self, memory: &MemoryLog, cycle: &Cycle) {
        let record = match cycle.status {
            CycleStatus::Succeeded => MemoryRecord::new(
                MemoryCategory::Pattern,
                cycle.id.clone(),
                format!(
                    "'{}' verified clean on branch {}",
                    cycle.meta.as_ref().map(|m| m.pr_title.as_str()).unwrap_or("change"),
                    cycle.branch().unwrap_or("?")
                ),
            ),
            CycleStatus::TestsFailed => MemoryRecord::new(
                MemoryCategory::Lesson,
                cycle.id.clone(),
                format!(
                    "verification stayed red after {} retries on branch {}",
                    cycle.retries,
                    cycle.branch().unwrap_or("?")
                ),
            ),
            _ => MemoryRecord::new(
                MemoryCategory::Lesson,
                cycle.id.clone(),
                format!(
                    "cycle aborted: {}",
                    cycle.observations.last().map(String::as_str).unwrap_or("unknown stage failure")
                ),
            ),
        };
        if let Err(e) = memory.append(&record) {
            log::warn!("could not append memory record for {}: {}", cycle.id, e);
        }
    }
}
