//! Crash-safe persistence for [`ExecutionState`] (`state.json`).
//!
//! Every mutation is written through immediately. Writes stage a temp file in
//! the same directory and rename it over the target, so a crash leaves either
//! the previous state or the new one on disk.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{SecondsFormat, Utc};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::atomic::{copy_verified, write_atomic};
use crate::core::state::{ExecutionState, validate_invariants};

const STATE_SCHEMA: &str = include_str!("../../schemas/execution_state.schema.json");

/// A state file that was set aside by [`StateStore::open_or_recover`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovery {
    pub backup: PathBuf,
    pub problems: Vec<String>,
}

impl Recovery {
    pub fn reason(&self) -> String {
        format!(
            "state integrity check failed (saved as {}): {}",
            self.backup.display(),
            self.problems.join("; ")
        )
    }
}

/// Owner of the in-memory state and its file.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    state: ExecutionState,
}

impl StateStore {
    /// Load the store from `path`, starting from the default state if the file is absent.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = load_state(&path)?;
        Ok(Self { path, state })
    }

    /// Like [`StateStore::open`], but a structurally broken file does not fail.
    ///
    /// The broken file is copied to `<name>.corrupt` and the store starts from
    /// the default state, which is not written until the next save. Read
    /// errors still fail.
    pub fn open_or_recover(path: impl Into<PathBuf>) -> Result<(Self, Option<Recovery>)> {
        let path = path.into();
        if !path.exists() {
            return Ok((Self::open(path)?, None));
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read state {}", path.display()))?;
        let problems = match parse_state(&contents) {
            Ok(state) => return Ok((Self { path, state }, None)),
            Err(problems) => problems,
        };
        let backup = corrupt_backup_path(&path);
        copy_verified(&path, &backup)
            .with_context(|| format!("back up corrupt state to {}", backup.display()))?;
        warn!(
            path = %path.display(),
            backup = %backup.display(),
            problems = %problems.join("; "),
            "state file is corrupt, starting from default state"
        );
        let store = Self {
            path,
            state: ExecutionState::default(),
        };
        Ok((store, Some(Recovery { backup, problems })))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    /// Persist the current state, stamping `last_updated`.
    pub fn save(&mut self) -> Result<()> {
        self.state.last_updated = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
        write_state(&self.path, &self.state)
    }

    /// Apply `change` and persist.
    ///
    /// If the write fails the change stays in memory only and the error is returned.
    pub fn update(&mut self, change: impl FnOnce(&mut ExecutionState)) -> Result<()> {
        change(&mut self.state);
        self.save()
    }

    /// Write the default state if no state file exists yet.
    pub fn ensure_exists(&mut self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        info!(path = %self.path.display(), "creating initial state file");
        self.save()
    }

    /// Bump the session counter, persist, and return the new value.
    pub fn increment_session_count(&mut self) -> Result<u32> {
        let mut session = 0;
        self.update(|state| session = state.next_session())?;
        debug!(session, "session count incremented");
        Ok(session)
    }

    /// Move `story_id` to completed, advance the current story, persist.
    pub fn mark_story_complete(&mut self, story_id: &str) -> Result<()> {
        self.update(|state| state.mark_story_complete(story_id))?;
        info!(
            story_id,
            next = ?self.state.current_story,
            remaining = self.state.remaining_stories.len(),
            "story marked complete"
        );
        Ok(())
    }
}

/// Load state from disk, returning the default when the file is missing.
///
/// The file is validated against the state schema; a malformed file is an error.
pub fn load_state(path: &Path) -> Result<ExecutionState> {
    if !path.exists() {
        debug!(path = %path.display(), "no state file, using default state");
        return Ok(ExecutionState::default());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read state {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse state {}", path.display()))?;
    let errors = schema_errors(&value)?;
    if !errors.is_empty() {
        return Err(anyhow!(
            "state schema validation failed for {}: {}",
            path.display(),
            errors.join("; ")
        ));
    }
    let state: ExecutionState = serde_json::from_value(value)
        .with_context(|| format!("deserialize state {}", path.display()))?;
    debug!(
        current_prd = ?state.current_prd,
        current_story = ?state.current_story,
        session_count = state.session_count,
        "state loaded"
    );
    Ok(state)
}

/// Atomically write state to disk (temp file + rename).
pub fn write_state(path: &Path, state: &ExecutionState) -> Result<()> {
    debug!(path = %path.display(), current_story = ?state.current_story, "writing state");
    let mut buf = serde_json::to_string_pretty(state)?;
    buf.push('\n');
    write_atomic(path, &buf).with_context(|| format!("save state {}", path.display()))
}

/// Re-read the state file and report every structural or queue problem found.
///
/// An empty list means the file is present, matches the schema, and satisfies
/// the queue invariants.
pub fn check_state_file(path: &Path) -> Vec<String> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => return vec![format!("read {}: {err}", path.display())],
    };
    let value: Value = match serde_json::from_str(&contents) {
        Ok(value) => value,
        Err(err) => return vec![format!("parse {}: {err}", path.display())],
    };
    let mut errors = match schema_errors(&value) {
        Ok(errors) => errors,
        Err(err) => return vec![format!("{err:#}")],
    };
    if !errors.is_empty() {
        return errors;
    }
    match serde_json::from_value::<ExecutionState>(value) {
        Ok(state) => errors.extend(validate_invariants(&state)),
        Err(err) => errors.push(format!("deserialize {}: {err}", path.display())),
    }
    errors
}

/// Parse and schema-check state file contents, collecting every problem.
fn parse_state(contents: &str) -> Result<ExecutionState, Vec<String>> {
    let value: Value = serde_json::from_str(contents).map_err(|err| vec![format!("parse: {err}")])?;
    let errors = schema_errors(&value).map_err(|err| vec![format!("{err:#}")])?;
    if !errors.is_empty() {
        return Err(errors);
    }
    serde_json::from_value(value).map_err(|err| vec![format!("deserialize: {err}")])
}

fn corrupt_backup_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state.json".to_string());
    path.with_file_name(format!("{name}.corrupt"))
}

fn schema_errors(value: &Value) -> Result<Vec<String>> {
    let schema: Value = serde_json::from_str(STATE_SCHEMA).context("parse state schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    Ok(compiled
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect())
}
