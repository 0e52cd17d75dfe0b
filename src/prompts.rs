//! Prompt builders for the agent-facing stages.
//!
//! Every decision point mandates a specific output file with a specific
//! shape. Prose in the transcript is never a control signal, so each prompt
//! names exact paths and the orchestrator checks those paths afterwards.

use crate::artifacts::scratch_rel;
use crate::cycle::Meta;
use crate::verify::CheckFailure;

/// Research: free-form findings, advisory only.
pub fn research(goal: &str, memory_context: &str) -> String {
    let mut p = format!(
        "You are surveying this repository before an automated improvement cycle.\n\n\
         ## Objective\n\n{}\n\n\
         Explore the codebase: read key source files, search for patterns, look at\n\
         recent history. Identify the single most valuable, smallest change worth\n\
         making next and any risks around it.\n\n\
         Write your findings as markdown to `{}`. Do not change any other file.\n",
        goal,
        scratch_rel("research.md"),
    );
    push_context(&mut p, memory_context);
    p
}

/// Plan: the instruction artifact plus the machine-readable meta record.
pub fn plan(
    goal: &str,
    cycle_id: &str,
    branch_prefix: &str,
    research: &str,
    previous_result: &str,
    memory_context: &str,
) -> String {
    let mut p = format!(
        "You are planning one small, reviewable change for an automated cycle.\n\n\
         ## Objective\n\n{}\n\n\
         Decide the next change and write BOTH files below. The cycle aborts if\n\
         either is missing.\n\n\
         1. `{}` — implementation instructions: what to change, where, how to\n\
            test it, and what is out of scope.\n\
         2. `{}` — strict JSON with exactly these fields:\n\n\
         ```json\n\
         {{\n\
           \"branch_name\": \"{}-<short-slug>\",\n\
           \"pr_title\": \"<conventional title>\",\n\
           \"commit_message\": \"<conventional commit message>\",\n\
           \"tests_to_run\": [\"lint\", \"test\"],\n\
           \"notes\": \"<anything a reviewer should know>\"\n\
         }}\n\
         ```\n\n\
         branch_name, pr_title and commit_message must be non-empty and\n\
         tests_to_run must name at least one check. Do not implement anything in\n\
         this step and do not create the branch yet.\n",
        goal,
        scratch_rel("plan-next.md"),
        scratch_rel("meta.json"),
        branch_prefix,
    );
    if !research.trim().is_empty() {
        p.push_str(&format!("\n## Research findings\n\n{}\n", research.trim()));
    }
    if !previous_result.trim().is_empty() {
        p.push_str(&format!("\n## Previous cycle result\n\n{}\n", previous_result.trim()));
    }
    push_context(&mut p, memory_context);
    p.push_str(&format!("\nCycle id: {}\n", cycle_id));
    p
}

/// Self-annotation: an independent second look at the plan before any code.
pub fn annotate(plan_text: &str, meta_json: &str) -> String {
    format!(
        "You are an independent reviewer looking at a proposed change plan before\n\
         implementation starts. You did not write this plan.\n\n\
         Assess scope (too large? split it), risk, missing test coverage and\n\
         unclear instructions. If the plan should change, rewrite `{}` and\n\
         `{}` in place, keeping the same JSON shape and all four required\n\
         fields populated. If the plan is sound, leave both files untouched.\n\n\
         ## Plan under review\n\n{}\n\n\
         ## Current meta record\n\n```json\n{}\n```\n",
        scratch_rel("plan-next.md"),
        scratch_rel("meta.json"),
        plan_text.trim(),
        meta_json.trim(),
    )
}

/// Implement: branch, edit, commit.
pub fn implement(plan_text: &str, meta: &Meta, max_diff_lines: u32, max_files: u32) -> String {
    format!(
        "Implement the planned change in this working copy.\n\n\
         Steps:\n\
         1. `git checkout -b {}`\n\
         2. Make the changes the plan describes, with tests.\n\
         3. Commit everything with exactly this message: {}\n\n\
         Constraints:\n\
         - Keep the diff under {} changed lines and {} files.\n\
         - Do not commit anything under `.nightshift/`.\n\
         - Stay inside the plan's scope; no drive-by refactors.\n\n\
         ## Plan\n\n{}\n",
        meta.branch_name,
        meta.commit_message,
        max_diff_lines,
        max_files,
        plan_text.trim(),
    )
}

/// Fix-only prompt for the self-healing verification loop.
pub fn fix(failures: &[CheckFailure], attempt: u32, max_retries: u32) -> String {
    let mut p = format!(
        "Verification failed (attempt {} of {}). Fix the failures below, then\n\
         `git add` the fixes and amend the existing commit\n\
         (`git commit --amend --no-edit`). Amend, do not refactor: change only\n\
         what the failing checks require.\n\n",
        attempt, max_retries,
    );
    for failure in failures {
        p.push_str(&format!("## Failing check: {}\n\n```\n{}\n```\n\n", failure.label, failure.output.trim()));
    }
    p
}

/// Independent review over the full diff, with the fixed checklist.
pub fn review(diff: &str, constraint_notes: &[String]) -> String {
    let mut p = format!(
        "You are an independent reviewer. You did not write this change. Review\n\
         the diff below against this checklist:\n\n\
         - correctness: does the change do what its commit message claims?\n\
         - security: any injection, path traversal, secret leakage?\n\
         - duplication: does it re-implement something the codebase already has?\n\
         - test coverage: are the new paths actually exercised?\n\
         - diff hygiene: stray files, debug output, unrelated edits?\n\
         - constraint compliance: is the change as small as it could be?\n\n\
         If you find problems you can fix safely, fix them and amend the commit\n\
         (`git commit --amend --no-edit`). Then write your review summary as\n\
         markdown to `{}`.\n",
        scratch_rel("review.md"),
    );
    if !constraint_notes.is_empty() {
        p.push_str("\n## Constraint observations\n\n");
        for note in constraint_notes {
            p.push_str(&format!("- {}\n", note));
        }
    }
    p.push_str(&format!("\n## Diff\n\n```diff\n{}\n```\n", diff.trim()));
    p
}

/// Summarize: the human-readable result artifact.
pub fn summarize(plan_text: &str, evidence: &str, review: &str, test_status: &str) -> String {
    format!(
        "Write a short, human-readable summary of this automated change cycle to\n\
         `{}`. A reviewer reads this file first, so state plainly:\n\n\
         - the branch and what the change is\n\
         - test status: {}\n\
         - whether it is safe to merge without a closer look, and why\n\
         - anything the review flagged\n\n\
         ## Plan\n\n{}\n\n## Evidence\n\n{}\n\n## Review\n\n{}\n",
        scratch_rel("result.md"),
        test_status,
        plan_text.trim(),
        evidence.trim(),
        if review.trim().is_empty() { "(no review file)" } else { review.trim() },
    )
}

fn push_context(prompt: &mut String, memory_context: &str) {
    if !memory_context.trim().is_empty() {
        prompt.push('\n');
        prompt.push_str(memory_context.trim_end());
        prompt.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> Meta {
        Meta {
            branch_name: "nightshift/c1-parser".to_string(),
            pr_title: "fix: parser".to_string(),
            commit_message: "fix: handle empty input in parser".to_string(),
            tests_to_run: vec!["test".to_string()],
            notes: String::new(),
        }
    }

    #[test]
    fn test_research_mandates_output_path() {
        let p = research("improve the parser", "");
        assert!(p.contains(".nightshift/research.md"));
        assert!(p.contains("improve the parser"));
    }

    #[test]
    fn test_plan_mandates_both_files() {
        let p = plan("goal", "c1", "nightshift/c1", "", "", "");
        assert!(p.contains(".nightshift/plan-next.md"));
        assert!(p.contains(".nightshift/meta.json"));
        assert!(p.contains("branch_name"));
        assert!(p.contains("tests_to_run"));
        assert!(p.contains("nightshift/c1-<short-slug>"));
    }

    #[test]
    fn test_plan_includes_context_sections() {
        let p = plan("goal", "c1", "pfx", "found a bug", "last cycle merged", "## Notes from earlier cycles\n\n- [lesson] (c0) x");
        assert!(p.contains("## Research findings"));
        assert!(p.contains("found a bug"));
        assert!(p.contains("## Previous cycle result"));
        assert!(p.contains("last cycle merged"));
        assert!(p.contains("Notes from earlier cycles"));
    }

    #[test]
    fn test_plan_omits_empty_sections() {
        let p = plan("goal", "c1", "pfx", "", "", "");
        assert!(!p.contains("## Research findings"));
        assert!(!p.contains("## Previous cycle result"));
    }

    #[test]
    fn test_annotate_is_reviewer_framed() {
        let p = annotate("the plan", "{\"branch_name\":\"b\"}");
        assert!(p.contains("independent reviewer"));
        assert!(p.contains("You did not write this plan"));
        assert!(p.contains(".nightshift/meta.json"));
    }

    #[test]
    fn test_implement_carries_branch_and_message() {
        let p = implement("do the thing", &meta(), 400, 10);
        assert!(p.contains("git checkout -b nightshift/c1-parser"));
        assert!(p.contains("fix: handle empty input in parser"));
        assert!(p.contains("under 400 changed lines and 10 files"));
        assert!(p.contains("Do not commit anything under `.nightshift/`"));
    }

    #[test]
    fn test_fix_is_amend_only() {
        let failures = vec![CheckFailure {
            label: "test".to_string(),
            output: "assertion failed: left == right".to_string(),
        }];
        let p = fix(&failures, 1, 3);
        assert!(p.contains("attempt 1 of 3"));
        assert!(p.contains("Amend, do not refactor"));
        assert!(p.contains("Failing check: test"));
        assert!(p.contains("assertion failed"));
    }

    #[test]
    fn test_review_has_full_checklist() {
        let p = review("diff --git a/x b/x", &[]);
        for item in ["correctness", "security", "duplication", "test coverage", "diff hygiene", "constraint compliance"] {
            assert!(p.contains(item), "checklist missing {}", item);
        }
        assert!(p.contains(".nightshift/review.md"));
        assert!(p.contains("diff --git"));
    }

    #[test]
    fn test_review_carries_constraint_notes() {
        let notes = vec!["diff has 812 lines, limit 400".to_string()];
        let p = review("d", &notes);
        assert!(p.contains("812 lines, limit 400"));
    }

    #[test]
    fn test_summarize_mentions_test_status() {
        let p = summarize("plan", "evidence", "", "tests-failed after 3 retries");
        assert!(p.contains(".nightshift/result.md"));
        assert!(p.contains("tests-failed after 3 retries"));
        assert!(p.contains("(no review file)"));
    }
}
