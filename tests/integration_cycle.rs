//! End-to-end cycle execution tests against a real git repository and a
//! scripted stand-in for the code-generation agent.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use nightshift::config::Config;
use nightshift::cycle::{CycleStatus, MergeOutcome};
use nightshift::memory::MemoryLog;
use nightshift::scheduler::Scheduler;
use tempfile::TempDir;

fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git").args(args).current_dir(dir).output().unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Primary repo plus a bare remote it pushes to.
fn setup_repo_with_remote(temp: &TempDir) -> (PathBuf, PathBuf) {
    let remote = temp.path().join("remote.git");
    let repo = temp.path().join("repo");
    Command::new("git")
        .args(["init", "--bare", remote.to_str().unwrap()])
        .output()
        .unwrap();
    std::fs::create_dir(&repo).unwrap();
    git(&repo, &["init", "-b", "main"]);
    git(&repo, &["config", "user.email", "ci@test.invalid"]);
    git(&repo, &["config", "user.name", "CI"]);
    git(&repo, &["remote", "add", "origin", remote.to_str().unwrap()]);
    std::fs::write(repo.join("Cargo.toml"), "[package]\nname = \"x\"\n").unwrap();
    git(&repo, &["add", "."]);
    git(&repo, &["commit", "-m", "init"]);
    (repo, remote)
}

/// Write an executable fake agent that dispatches on an invocation counter:
/// research, plan, annotate, implement, review, summarize — in pipeline
/// order, like the real agent would be called.
fn write_agent_script(temp: &TempDir) -> PathBuf {
    let state = temp.path().join("agent-calls");
    let script_path = temp.path().join("fake-agent.sh");
    let script = format!(
        r#"#!/bin/sh
n=$(cat "{state}" 2>/dev/null || echo 0)
n=$((n+1))
echo $n > "{state}"
case $n in
  1)
    echo "the parser swallows empty input" > .nightshift/research.md
    ;;
  2)
    echo "Fix the parser to handle empty input; add a regression test." > .nightshift/plan-next.md
    cat > .nightshift/meta.json <<'EOF'
{{"branch_name":"cycle-1-fix","pr_title":"fix: x","commit_message":"fix: x","tests_to_run":["lint","test"],"notes":""}}
EOF
    ;;
  4)
    git checkout -b cycle-1-fix
    echo "handled" > parser-fix.txt
    git add parser-fix.txt
    git commit -m "fix: x"
    ;;
  5)
    echo "change is minimal and covered" > .nightshift/review.md
    ;;
  6)
    echo "Fixed empty-input handling on cycle-1-fix; tests green." > .nightshift/result.md
    ;;
esac
exit 0
"#,
        state = state.display()
    );
    std::fs::write(&script_path, script).unwrap();
    std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755)).unwrap();
    script_path
}

fn base_config(temp: &TempDir, repo: &Path, agent_program: &str) -> Config {
    let mut config = Config::default();
    config.repo.root = repo.to_path_buf();
    config.run.max_cycles = 1;
    config.run.sleep_secs = 0;
    config.agent.program = agent_program.to_string();
    config.agent.args = vec![];
    config.publish.create_pr = false; // the hosting service is out of reach here
    config.checks.commands = [
        ("lint".to_string(), "true".to_string()),
        ("test".to_string(), "true".to_string()),
    ]
    .into();
    config.checks.baseline = vec![];
    config.storage.log_root = temp.path().join("runs");
    config.storage.workspace_base = temp.path().join("workspaces");
    config
}

fn remote_branches(remote: &Path) -> String {
    let output = Command::new("git")
        .args(["ls-remote", "--heads", remote.to_str().unwrap()])
        .output()
        .unwrap();
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[tokio::test]
async fn test_full_cycle_succeeds_and_pushes() {
    let temp = TempDir::new().unwrap();
    let (repo, remote) = setup_repo_with_remote(&temp);
    let script = write_agent_script(&temp);
    let config = base_config(&temp, &repo, script.to_str().unwrap());

    let scheduler = Scheduler::new(config);
    let summary = scheduler.run().await.unwrap();

    assert_eq!(summary.cycles.len(), 1);
    let cycle = &summary.cycles[0];
    assert_eq!(cycle.status, CycleStatus::Succeeded);
    assert_eq!(cycle.retries, 0);
    assert_eq!(cycle.branch(), Some("cycle-1-fix"));
    assert_eq!(cycle.publication.outcome, MergeOutcome::NotAttempted);

    // The branch made it to the remote
    assert!(remote_branches(&remote).contains("refs/heads/cycle-1-fix"));

    // The full artifact trail exists
    let run_dir = temp.path().join("runs").join(&summary.run_id);
    for name in [
        format!("research-{}.md", cycle.id),
        format!("plan-next-{}.md", cycle.id),
        format!("meta-{}.json", cycle.id),
        format!("review-{}.md", cycle.id),
        format!("evidence-{}.md", cycle.id),
        format!("result-{}.md", cycle.id),
        format!("prompt-plan-{}.md", cycle.id),
        format!("transcript-implement-{}.log", cycle.id),
        format!("night-report-{}.md", summary.run_id),
        format!("next-session-plan-{}.md", summary.run_id),
    ] {
        assert!(run_dir.join(&name).exists(), "missing artifact {}", name);
    }

    // Result artifact is the agent's summary, verbatim
    let result = std::fs::read_to_string(run_dir.join(format!("result-{}.md", cycle.id))).unwrap();
    assert!(result.contains("tests green"));

    // Workspace reclaimed
    assert!(!temp.path().join("workspaces").join(&cycle.id).exists());
}

#[tokio::test]
async fn test_planless_cycle_aborts_without_pushing() {
    let temp = TempDir::new().unwrap();
    let (repo, remote) = setup_repo_with_remote(&temp);
    // An agent that always exits clean but writes nothing
    let config = base_config(&temp, &repo, "true");

    let scheduler = Scheduler::new(config);
    let summary = scheduler.run().await.unwrap();

    let cycle = &summary.cycles[0];
    assert_eq!(cycle.status, CycleStatus::Aborted);
    assert!(cycle.meta.is_none());
    assert_eq!(cycle.publication.outcome, MergeOutcome::NotAttempted);

    // Nothing was pushed and the workspace is gone
    assert!(remote_branches(&remote).is_empty());
    assert!(!temp.path().join("workspaces").join(&cycle.id).exists());

    // But a legible trail remains
    let run_dir = temp.path().join("runs").join(&summary.run_id);
    let result = std::fs::read_to_string(run_dir.join(format!("result-{}.md", cycle.id))).unwrap();
    assert!(result.contains("aborted"));
    assert!(result.contains("safe to publish without review: no"));
}

#[tokio::test]
async fn test_degraded_cycle_still_publishes_branch() {
    let temp = TempDir::new().unwrap();
    let (repo, remote) = setup_repo_with_remote(&temp);
    let script = write_agent_script(&temp);
    let mut config = base_config(&temp, &repo, script.to_str().unwrap());
    // The test check never goes green; retries exhaust
    config.checks.commands.insert("test".to_string(), "false".to_string());

    let scheduler = Scheduler::new(config);
    let summary = scheduler.run().await.unwrap();

    let cycle = &summary.cycles[0];
    assert_eq!(cycle.status, CycleStatus::TestsFailed);
    assert_eq!(cycle.retries, 3);

    // Publication still attempted: a human makes the final call
    assert!(remote_branches(&remote).contains("refs/heads/cycle-1-fix"));

    // Degradation recorded for the next session
    let memory = MemoryLog::new(temp.path().join("runs").join("memory.jsonl"));
    let records = memory.load_all().unwrap();
    assert!(records.iter().any(|r| r.text.contains("verification stayed red")));
}

#[tokio::test]
async fn test_pattern_memory_survives_the_run() {
    let temp = TempDir::new().unwrap();
    let (repo, _remote) = setup_repo_with_remote(&temp);
    let script = write_agent_script(&temp);
    let config = base_config(&temp, &repo, script.to_str().unwrap());

    let summary = Scheduler::new(config).run().await.unwrap();
    assert_eq!(summary.count(CycleStatus::Succeeded), 1);

    // The consolidated pattern memory now exists for future sessions
    let patterns = std::fs::read_to_string(temp.path().join("runs").join("patterns.md")).unwrap();
    assert!(patterns.contains("verified clean on branch cycle-1-fix"));

    // And the raw memory log carries the record a later run will load
    let memory = MemoryLog::new(temp.path().join("runs").join("memory.jsonl"));
    assert_eq!(memory.load_all().unwrap().len(), 1);
}
