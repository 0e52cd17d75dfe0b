//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: execute the development-cycle loop (the default)
//! - baseline: run only the pre-loop checks
//! - report: rebuild the consolidated report for a past run

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;

/// nightshift - autonomous overnight development cycles
#[derive(Parser, Debug)]
#[command(name = "nightshift")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute (defaults to `run`)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the cycle loop
    Run(RunArgs),

    /// Run the pre-loop baseline check and exit
    Baseline,

    /// Rebuild the report artifacts for a past run
    Report {
        /// Run id (e.g. run-20260807-231500)
        run_id: String,
    },
}

/// Flags overriding the loaded configuration for one run.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Number of cycles to run
    #[arg(long)]
    pub cycles: Option<u32>,

    /// Seconds to sleep between cycles
    #[arg(long)]
    pub sleep_secs: Option<u64>,

    /// Maximum verification retries per cycle
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Diff-size constraint (changed lines)
    #[arg(long)]
    pub max_diff_lines: Option<u32>,

    /// Diff-size constraint (changed files)
    #[arg(long)]
    pub max_files: Option<u32>,

    /// Do not push branches
    #[arg(long)]
    pub no_push: bool,

    /// Push but do not open pull requests
    #[arg(long)]
    pub no_pr: bool,

    /// Open pull requests as drafts
    #[arg(long)]
    pub draft: bool,

    /// Squash-merge clean cycles automatically
    #[arg(long)]
    pub auto_merge: bool,

    /// Keep per-cycle workspaces on disk after each cycle
    #[arg(long)]
    pub retain_workspaces: bool,

    /// Notification webhook URL
    #[arg(long)]
    pub notify_url: Option<String>,

    /// Repository to work on (defaults to the configured root)
    #[arg(long)]
    pub repo: Option<PathBuf>,

    /// Standing objective for the planning stages
    #[arg(long)]
    pub goal: Option<String>,
}

impl RunArgs {
    /// Overlay these flags onto a loaded config.
    pub fn apply(&self, config: &mut Config) {
        if let Some(cycles) = self.cycles {
            config.run.max_cycles = cycles;
        }
        if let Some(sleep_secs) = self.sleep_secs {
            config.run.sleep_secs = sleep_secs;
        }
        if let Some(max_retries) = self.max_retries {
            config.checks.max_retries = max_retries;
        }
        if let Some(max_diff_lines) = self.max_diff_lines {
            config.limits.max_diff_lines = max_diff_lines;
        }
        if let Some(max_files) = self.max_files {
            config.limits.max_files = max_files;
        }
        if self.no_push {
            config.publish.push = false;
        }
        if self.no_pr {
            config.publish.create_pr = false;
        }
        if self.draft {
            config.publish.draft = true;
        }
        if self.auto_merge {
            config.publish.auto_merge = true;
        }
        if self.retain_workspaces {
            config.run.retain_workspaces = true;
        }
        if let Some(url) = &self.notify_url {
            config.notify.endpoint = Some(url.clone());
        }
        if let Some(repo) = &self.repo {
            config.repo.root = repo.clone();
        }
        if let Some(goal) = &self.goal {
            config.run.goal = goal.clone();
        }
    }
}
