//! Append-only audit trail (`history.md`).
//!
//! The loop only ever appends to this file and never reads it back, so the
//! format is free to stay human-oriented markdown.

use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::debug;

pub const HISTORY_HEADER: &str = "# Storyloop - Execution History\n\n\
This file is an append-only audit trail. Never read during execution.\n\n\
---\n\n";

/// A story that passed its tests and was committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionEntry {
    pub story_id: String,
    pub prd: String,
    pub title: String,
    pub acceptance_criteria: Vec<String>,
    pub passed: u32,
    pub total: u32,
    pub commit_id: String,
    pub duration: Duration,
    pub session: u32,
}

/// A story the loop stopped on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEntry {
    pub story_id: String,
    pub prd: String,
    pub reason: String,
    pub session: u32,
}

/// Tests were generated for a story.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestGenerationEntry {
    pub story_id: String,
    pub prd: String,
    pub test_count: usize,
    pub session: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEntry {
    Completion(CompletionEntry),
    Block(BlockEntry),
    TestGeneration(TestGenerationEntry),
}

impl HistoryEntry {
    /// Render the entry as a markdown section headed by `timestamp`.
    pub fn render(&self, timestamp: &str) -> String {
        let mut out = String::new();
        match self {
            HistoryEntry::Completion(entry) => {
                let _ = writeln!(out, "## {timestamp} - Story {} Complete\n", entry.story_id);
                let _ = writeln!(out, "- **PRD:** {}", entry.prd);
                let _ = writeln!(out, "- **Story:** {} - {}", entry.story_id, entry.title);
                let _ = writeln!(
                    out,
                    "- **Duration:** {} minutes",
                    entry.duration.as_secs() / 60
                );
                let _ = writeln!(out, "- **Tests:** {}/{} passed", entry.passed, entry.total);
                let _ = writeln!(out, "- **Commit:** {}", entry.commit_id);
                let _ = writeln!(out, "- **Session:** {}\n", entry.session);
                if !entry.acceptance_criteria.is_empty() {
                    out.push_str("### Acceptance Criteria Met\n");
                    for criterion in &entry.acceptance_criteria {
                        let _ = writeln!(out, "- [x] {criterion}");
                    }
                    out.push('\n');
                }
            }
            HistoryEntry::Block(entry) => {
                let _ = writeln!(out, "## {timestamp} - Story {} BLOCKED\n", entry.story_id);
                let _ = writeln!(out, "- **PRD:** {}", entry.prd);
                let _ = writeln!(out, "- **Story:** {}", entry.story_id);
                let _ = writeln!(out, "- **Session:** {}", entry.session);
                let _ = writeln!(out, "- **Reason:** {}\n", entry.reason);
            }
            HistoryEntry::TestGeneration(entry) => {
                let _ = writeln!(out, "## {timestamp} - Tests Generated for {}\n", entry.story_id);
                let _ = writeln!(out, "- **PRD:** {}", entry.prd);
                let _ = writeln!(out, "- **Story:** {}", entry.story_id);
                let _ = writeln!(out, "- **Tests Generated:** {}", entry.test_count);
                let _ = writeln!(out, "- **Session:** {}\n", entry.session);
            }
        }
        out.push_str("---\n\n");
        out
    }
}

/// Writer for the audit trail.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    path: PathBuf,
}

impl HistoryLog {
    /// Open the log, creating it with its header if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create directory {}", parent.display()))?;
            }
            fs::write(&path, HISTORY_HEADER)
                .with_context(|| format!("create history {}", path.display()))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `entry` stamped with the current UTC minute.
    pub fn append(&self, entry: &HistoryEntry) -> Result<()> {
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M").to_string();
        self.append_at(entry, &timestamp)
    }

    pub fn append_at(&self, entry: &HistoryEntry, timestamp: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open history {}", self.path.display()))?;
        file.write_all(entry.render(timestamp).as_bytes())
            .with_context(|| format!("append history {}", self.path.display()))?;
        debug!(path = %self.path.display(), "history entry appended");
        Ok(())
    }
}
