//! Per-story phase bookkeeping.
//!
//! A story moves through `test`, then `implement`, and optionally `fix`.
//! The tracker only records the most recent phase; resumption re-derives the
//! phase from the test artifacts on disk.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Lifecycle phase of a single story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Test,
    Implement,
    Fix,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Test, Phase::Implement, Phase::Fix];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Test => "test",
            Phase::Implement => "implement",
            Phase::Fix => "fix",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected phase name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidPhase(pub String);

impl fmt::Display for InvalidPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid phase '{}' (expected one of: test, implement, fix)",
            self.0
        )
    }
}

impl std::error::Error for InvalidPhase {}

impl FromStr for Phase {
    type Err = InvalidPhase;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| InvalidPhase(s.to_string()))
    }
}

/// Records which phase each story is in.
pub trait PhaseTracker {
    /// Record `phase` as the current phase of `story_id`, replacing any previous one.
    fn track_phase(&mut self, story_id: &str, phase: Phase) -> Result<()>;

    /// Last phase recorded for `story_id`, or `None` if it was never tracked.
    fn current_phase(&self, story_id: &str) -> Option<Phase>;

    /// Parse `phase` and record it, rejecting names outside the known phases.
    fn track_named(&mut self, story_id: &str, phase: &str) -> Result<()> {
        let phase: Phase = phase.parse()?;
        self.track_phase(story_id, phase)
    }
}

/// Tracker that lives for the duration of a single loop run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InMemoryPhaseTracker {
    phases: HashMap<String, Phase>,
}

impl InMemoryPhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PhaseTracker for InMemoryPhaseTracker {
    fn track_phase(&mut self, story_id: &str, phase: Phase) -> Result<()> {
        self.phases.insert(story_id.to_string(), phase);
        Ok(())
    }

    fn current_phase(&self, story_id: &str) -> Option<Phase> {
        self.phases.get(story_id).copied()
    }
}
