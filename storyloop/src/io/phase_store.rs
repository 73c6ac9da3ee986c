//! Phase tracker that survives process restarts (`.storyloop/phases.json`).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use super::atomic::write_atomic;
use crate::core::phase::{Phase, PhaseTracker};

/// [`PhaseTracker`] backed by a JSON map written on every change.
#[derive(Debug, Clone)]
pub struct FilePhaseTracker {
    path: PathBuf,
    phases: BTreeMap<String, Phase>,
}

impl FilePhaseTracker {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let phases = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read phases {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("parse phases {}", path.display()))?
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, phases })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PhaseTracker for FilePhaseTracker {
    fn track_phase(&mut self, story_id: &str, phase: Phase) -> Result<()> {
        self.phases.insert(story_id.to_string(), phase);
        let mut buf = serde_json::to_string_pretty(&self.phases)?;
        buf.push('\n');
        write_atomic(&self.path, &buf)?;
        debug!(story_id, phase = %phase, "phase persisted");
        Ok(())
    }

    fn current_phase(&self, story_id: &str) -> Option<Phase> {
        self.phases.get(story_id).copied()
    }
}
