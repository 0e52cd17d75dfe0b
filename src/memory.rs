//! Append-only memory log shared across cycles and runs.
//!
//! Records are never mutated once written; readers prune by recency. This is
//! the only cross-cycle state besides the previous cycle's result artifact.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Category of a persisted note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    Lesson,
    Pattern,
    Decision,
}

impl MemoryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryCategory::Lesson => "lesson",
            MemoryCategory::Pattern => "pattern",
            MemoryCategory::Decision => "decision",
        }
    }
}

/// A small persisted note, keyed by category and cycle id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub category: MemoryCategory,
    pub cycle_id: String,
    pub text: String,
    pub recorded_at: DateTime<Utc>,
}

impl MemoryRecord {
    pub fn new(category: MemoryCategory, cycle_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            category,
            cycle_id: cycle_id.into(),
            text: text.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// JSONL-backed memory log.
#[derive(Debug, Clone)]
pub struct MemoryLog {
    path: PathBuf,
}

impl MemoryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. The file is the source of truth; no rewrite ever.
    pub fn append(&self, record: &MemoryRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        Ok(())
    }

    /// Load all records in write order. Malformed lines are skipped: a
    /// damaged memory log must never block the loop.
    pub fn load_all(&self) -> Result<Vec<MemoryRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MemoryRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => log::warn!("skipping malformed memory record: {}", e),
            }
        }
        Ok(records)
    }

    /// Load at most the `limit` most recent records, oldest first.
    pub fn load_recent(&self, limit: usize) -> Result<Vec<MemoryRecord>> {
        let mut records = self.load_all()?;
        if records.len() > limit {
            records.drain(..records.len() - limit);
        }
        Ok(records)
    }
}

/// Render records as prompt context.
pub fn format_for_prompt(records: &[MemoryRecord]) -> String {
    if records.is_empty() {
        return String::new();
    }
    let mut out = String::from("## Notes from earlier cycles\n\n");
    for record in records {
        out.push_str(&format!("- [{}] ({}) {}\n", record.category.as_str(), record.cycle_id, record.text));
    }
    out
}
