//! Error types for nightshift
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur while driving development cycles
#[derive(Debug, Error)]
pub enum NightshiftError {
    /// Pre-flight configuration problem; fatal before any cycle starts
    #[error("Configuration error: {0}")]
    Config(String),

    /// Workspace (git worktree) allocation or teardown failure
    #[error("Workspace error: {0}")]
    Workspace(String),

    /// Agent subprocess failed or did not honor its file contract
    #[error("Agent error: {0}")]
    Agent(String),

    /// A stage contract was violated (required artifact missing, malformed meta)
    #[error("Stage '{stage}' failed: {reason}")]
    Stage { stage: String, reason: String },

    /// Artifact store read/write failure
    #[error("Artifact error: {0}")]
    Artifact(String),

    /// Publication (push / pull request / merge) failure
    #[error("Publish error: {0}")]
    Publish(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NightshiftError {
    /// Shorthand for a stage contract violation.
    pub fn stage(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for nightshift operations
pub type Result<T> = std::result::Result<T, NightshiftError>;
