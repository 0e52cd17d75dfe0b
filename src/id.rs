//! Identifier generation for runs and cycles.
//!
//! A run groups the cycles of one invocation; a cycle id embeds the run
//! timestamp plus the cycle ordinal so ids sort chronologically and stay
//! unique within a run without any random component.

use chrono::{DateTime, Utc};

/// Format a timestamp the way ids embed it: `YYYYmmdd-HHMMSS`.
pub fn timestamp_slug(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d-%H%M%S").to_string()
}

/// Generate a run id.
///
/// Format: `run-{timestamp}`
/// Example: `run-20260807-231500`
pub fn generate_run_id() -> String {
    format!("run-{}", timestamp_slug(Utc::now()))
}

/// Generate a cycle id from a run start time and a 1-based cycle ordinal.
///
/// Format: `{timestamp}-{ordinal:02}`
/// Example: `20260807-231500-03`
pub fn generate_cycle_id(started: DateTime<Utc>, ordinal: u32) -> String {
    format!("{}-{:02}", timestamp_slug(started), ordinal)
}

/// Suggested branch prefix for a cycle, embedded into the planning prompt.
///
/// The agent picks the final branch name, but seeding it with the cycle id
/// keeps branch names unique within a run.
pub fn branch_prefix(cycle_id: &str) -> String {
    format!("nightshift/{}", cycle_id)
}
