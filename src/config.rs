use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub run: RunConfig,
    pub repo: RepoConfig,
    pub agent: AgentConfig,
    pub checks: ChecksConfig,
    pub limits: LimitsConfig,
    pub publish: PublishConfig,
    pub storage: StorageConfig,
    pub notify: NotifyConfig,
}

/// Loop-level settings: how many cycles, how they pace, what they pursue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub max_cycles: u32,
    pub sleep_secs: u64,
    /// Standing objective handed to the research and planning prompts.
    pub goal: String,
    /// Keep per-cycle worktrees on disk after the cycle ends.
    pub retain_workspaces: bool,
    /// How many memory records feed each planning prompt.
    pub memory_context_records: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_cycles: 3,
            sleep_secs: 30,
            goal: "Improve this codebase incrementally: fix real bugs, strengthen tests, reduce duplication. One small reviewable change per cycle.".to_string(),
            retain_workspaces: false,
            memory_context_records: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    /// Primary working copy the worktrees hang off.
    pub root: PathBuf,
    /// Revision each cycle starts from.
    pub base_revision: String,
    /// Files that must exist before any cycle starts.
    pub required_files: Vec<String>,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            base_revision: "HEAD".to_string(),
            required_files: vec!["Cargo.toml".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub program: String,
    pub args: Vec<String>,
    /// 0 disables the timeout.
    pub timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: vec!["--print".to_string(), "--dangerously-skip-permissions".to_string()],
            timeout_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChecksConfig {
    /// Named check commands the meta record's `tests_to_run` can reference.
    pub commands: HashMap<String, String>,
    /// Label of the auto-fixable format check.
    pub format_label: String,
    /// Deterministic reformat command run when the format check fails.
    pub format_fix: Option<String>,
    pub max_retries: u32,
    /// Checks run once against the primary copy before the loop starts.
    pub baseline: Vec<String>,
}

impl Default for ChecksConfig {
    fn default() -> Self {
        let mut commands = HashMap::new();
        commands.insert("lint".to_string(), "cargo clippy --all-targets -- -D warnings".to_string());
        commands.insert("test".to_string(), "cargo test".to_string());
        commands.insert("fmt".to_string(), "cargo fmt -- --check".to_string());
        Self {
            commands,
            format_label: "fmt".to_string(),
            format_fix: Some("cargo fmt".to_string()),
            max_retries: 3,
            baseline: vec!["fmt".to_string(), "test".to_string()],
        }
    }
}

/// Diff-size constraints measured in the evidence stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_diff_lines: u32,
    pub max_files: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_diff_lines: 400,
            max_files: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub push: bool,
    pub create_pr: bool,
    pub draft: bool,
    pub auto_merge: bool,
    pub remote: String,
}

impl Default for PublishConfig {
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

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Run log directories land under here, one per run id.
    pub log_root: PathBuf,
    /// Per-cycle worktrees land under here.
    pub workspace_base: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            log_root: data.join("nightshift").join("runs"),
            workspace_base: data.join("nightshift").join("workspaces"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Webhook URL; absence disables notifications without failing the run.
    pub endpoint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            run: RunConfig::default(),
            repo: RepoConfig::default(),
            agent: AgentConfig::default(),
            checks: ChecksConfig::default(),
            limits: LimitsConfig::default(),
            publish: PublishConfig::default(),
            storage: StorageConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}
