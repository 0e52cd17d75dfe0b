//! Post-loop reporting.
//!
//! After the last cycle the run's artifacts are aggregated into a
//! consolidated report, a prioritized next-session plan, and the long-lived
//! pattern memory future sessions read back.

use std::path::{Path, PathBuf};

use crate::artifacts::ArtifactStore;
use crate::cycle::{Cycle, CycleStatus, MergeOutcome};
use crate::error::Result;
use crate::memory::{MemoryCategory, MemoryRecord};

/// Aggregates cycle records into run-level artifacts.
pub struct Reporter<'a> {
    store: &'a ArtifactStore,
}

impl<'a> Reporter<'a> {
    pub fn new(store: &'a ArtifactStore) -> Self {
        Self { store }
    }

    /// Per-cycle record name, written by the scheduler after each cycle so
    /// reports can be rebuilt later.
    pub fn cycle_record_name(cycle_id: &str) -> String {
        format!("cycle-{}.json", cycle_id)
    }

    /// Load every persisted cycle record in this run's store.
    pub fn load_cycles(&self) -> Result<Vec<Cycle>> {
        let mut cycles = Vec::new();
        for name in self.store.list()? {
            if name.starts_with("cycle-") && name.ends_with(".json") {
                match serde_json::from_str::<Cycle>(&self.store.read(&name)?) {
                    Ok(cycle) => cycles.push(cycle),
                    Err(e) => log::warn!("skipping unreadable cycle record {}: {}", name, e),
                }
            }
        }
        cycles.sort_by_key(|c| c.index);
        Ok(cycles)
    }

    /// Write the consolidated run report.
    pub fn write_run_report(&self, run_id: &str, cycles: &[Cycle]) -> Result<PathBuf> {
        let mut out = format!("# Night report — {}\n\n", run_id);

        let count = |status: CycleStatus| cycles.iter().filter(|c| c.status == status).count();
        out.push_str(&format!(
            "{} cycle(s): {} succeeded, {} tests-failed, {} aborted.\n\n",
            cycles.len(),
            count(CycleStatus::Succeeded),
            count(CycleStatus::TestsFailed),
            count(CycleStatus::Aborted),
        ));

        out.push_str("| cycle | branch | status | retries | PR | merge |\n");
        out.push_str("|---|---|---|---|---|---|\n");
        for cycle in cycles {
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} |\n",
                cycle.id,
                cycle.branch().unwrap_or("-"),
                cycle.status,
                cycle.retries,
                cycle.publication.pr_number.map(|n| format!("#{}", n)).unwrap_or_else(|| "-".to_string()),
                cycle.publication.outcome.as_str(),
            ));
        }
        out.push('\n');

        for cycle in cycles {
            out.push_str(&format!("## Cycle {} ({})\n\n", cycle.id, cycle.status));
            for stage in &cycle.stages {
                let mark = if stage.ok { "ok" } else { "FAILED" };
                if stage.note.is_empty() {
                    out.push_str(&format!("- {}: {}\n", stage.stage, mark));
                } else {
                    out.push_str(&format!("- {}: {} — {}\n", stage.stage, mark, stage.note));
                }
            }
            for observation in &cycle.observations {
                out.push_str(&format!("- note: {}\n", observation));
            }
            let result = self.store.read_or_empty(&ArtifactStore::result_name(&cycle.id));
            if !result.trim().is_empty() {
                out.push_str(&format!("\n{}\n", result.trim()));
            }
            out.push('\n');
        }

        self.store.write(&ArtifactStore::report_name(run_id), &out)
    }

    /// Write the prioritized plan of what the next session should do first.
    pub fn write_next_session_plan(&self, run_id: &str, cycles: &[Cycle]) -> Result<PathBuf> {
        let mut actions: Vec<String> = Vec::new();

        for cycle in cycles {
            if cycle.publication.outcome == MergeOutcome::Held {
                actions.push(format!(
                    "Resolve the held merge for branch `{}` (cycle {}): checks or conflicts blocked it.",
                    cycle.branch().unwrap_or("?"),
                    cycle.id
                ));
            }
        }
        for cycle in cycles {
            if cycle.status == CycleStatus::TestsFailed {
                actions.push(format!(
                    "Fix the failing verification on branch `{}` (cycle {}, {} retries exhausted) before reviewing its PR.",
                    cycle.branch().unwrap_or("?"),
                    cycle.id,
                    cycle.retries
                ));
            }
        }
        for cycle in cycles {
            if cycle.publication.outcome == MergeOutcome::Failed {
                actions.push(format!(
                    "Publication failed for cycle {}; push or PR creation needs manual attention.",
                    cycle.id
                ));
            }
        }
        for cycle in cycles {
            if cycle.status == CycleStatus::Aborted {
                let failed_stage = cycle
                    .stages
                    .iter()
                    .rev()
                    .find(|s| !s.ok)
                    .map(|s| s.stage.as_str())
                    .unwrap_or("unknown");
                actions.push(format!(
                    "Investigate cycle {}: aborted at the {} stage.",
                    cycle.id, failed_stage
                ));
            }
        }
        for cycle in cycles {
            for observation in &cycle.observations {
                if observation.contains("constraint breach") {
                    actions.push(format!("Cycle {}: {}.", cycle.id, observation));
                }
            }
        }

        let mut out = format!("# Next session plan — {}\n\n", run_id);
        if actions.is_empty() {
            out.push_str("No follow-ups required; continue with the standing objective.\n");
        } else {
            for (i, action) in actions.iter().enumerate() {
                out.push_str(&format!("{}. {}\n", i + 1, action));
            }
        }

        self.store.write(&ArtifactStore::next_plan_name(run_id), &out)
    }

    /// Write the consolidated pattern memory at a long-lived location shared
    /// across runs.
    pub fn write_patterns(&self, patterns_path: &Path, records: &[MemoryRecord]) -> Result<()> {
        let mut out = String::from("# Patterns\n\n");
        for category in [MemoryCategory::Pattern, MemoryCategory::Lesson, MemoryCategory::Decision] {
            let entries: Vec<&MemoryRecord> = records.iter().filter(|r| r.category == category).collect();
            if entries.is_empty() {
                continue;
            }
            out.push_str(&format!("## {}s\n\n", category.as_str()));
            for record in entries {
                out.push_str(&format!("- ({}) {}\n", record.cycle_id, record.text));
            }
            out.push('\n');
        }

        if let Some(parent) = patterns_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(patterns_path, out)?;
        Ok(())
    }
}
