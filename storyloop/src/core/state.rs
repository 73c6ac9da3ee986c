//! Execution state model and its pure transitions.
//!
//! Persistence lives in `io::state_store`; everything here is in-memory so
//! the queue rules can be tested without touching disk.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Durable progress record (`state.json`).
///
/// Field names are part of the on-disk format and must not be renamed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutionState {
    /// File name of the PRD being worked on (relative to the PRD directory).
    pub current_prd: Option<String>,
    /// Story being worked on; always the head of `remaining_stories`.
    pub current_story: Option<String>,
    /// Stories finished for the current PRD, in completion order.
    pub completed_stories: Vec<String>,
    /// Stories still to do for the current PRD, in PRD order.
    pub remaining_stories: Vec<String>,
    /// ISO-8601 UTC timestamp of the last save.
    pub last_updated: Option<String>,
    /// Number of story sessions started so far.
    pub session_count: u32,
}

impl ExecutionState {
    /// Move `story_id` from remaining to completed and advance the current story.
    ///
    /// Idempotent: completing an already-completed id leaves the lists unchanged.
    pub fn mark_story_complete(&mut self, story_id: &str) {
        self.remaining_stories.retain(|id| id != story_id);
        if !self.completed_stories.iter().any(|id| id == story_id) {
            self.completed_stories.push(story_id.to_string());
        }
        self.current_story = self.remaining_stories.first().cloned();
    }

    /// Point the state at a freshly loaded PRD.
    pub fn reset_for_prd(&mut self, prd_name: &str, story_ids: Vec<String>) {
        let mut seen = HashSet::new();
        let remaining: Vec<String> = story_ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();
        self.current_prd = Some(prd_name.to_string());
        self.current_story = remaining.first().cloned();
        self.remaining_stories = remaining;
        self.completed_stories.clear();
    }

    /// Record that no PRD is left to work on.
    ///
    /// `completed_stories` is kept as a record of the last PRD.
    pub fn clear_queue(&mut self) {
        self.current_prd = None;
        self.current_story = None;
        self.remaining_stories.clear();
    }

    /// Bump and return the session counter.
    pub fn next_session(&mut self) -> u32 {
        self.session_count = self.session_count.saturating_add(1);
        self.session_count
    }

    /// Stories that block archival of a PRD whose stories are `prd_story_ids`.
    ///
    /// Anything still queued counts, as does any PRD story that never reached
    /// the completed list.
    pub fn incomplete_stories(&self, prd_story_ids: &[String]) -> Vec<String> {
        let mut incomplete: Vec<String> = self.remaining_stories.clone();
        for id in prd_story_ids {
            if !self.completed_stories.contains(id) && !incomplete.contains(id) {
                incomplete.push(id.clone());
            }
        }
        incomplete
    }
}

/// Check the queue invariants that the JSON schema cannot express:
/// - no story is both remaining and completed
/// - no duplicates in either list
/// - `current_story` is the head of `remaining_stories`
/// - `current_story` is empty exactly when `remaining_stories` is empty
pub fn validate_invariants(state: &ExecutionState) -> Vec<String> {
    let mut errors = Vec::new();

    let completed: HashSet<&str> = state.completed_stories.iter().map(String::as_str).collect();
    for id in &state.remaining_stories {
        if completed.contains(id.as_str()) {
            errors.push(format!("story '{id}' is both remaining and completed"));
        }
    }
    push_duplicates("remaining_stories", &state.remaining_stories, &mut errors);
    push_duplicates("completed_stories", &state.completed_stories, &mut errors);

    match (&state.current_story, state.remaining_stories.first()) {
        (None, None) => {}
        (Some(current), Some(head)) => {
            if current != head {
                errors.push(format!(
                    "current_story '{current}' is not the head of remaining_stories ('{head}')"
                ));
            }
        }
        (Some(current), None) => errors.push(format!(
            "current_story '{current}' set but remaining_stories is empty"
        )),
        (None, Some(_)) => {
            errors.push("current_story is empty but remaining_stories is not".to_string());
        }
    }

    if state.current_prd.is_none() && !state.remaining_stories.is_empty() {
        errors.push("remaining_stories set without a current_prd".to_string());
    }

    errors
}

fn push_duplicates(field: &str, ids: &[String], errors: &mut Vec<String>) {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id.as_str()) {
            errors.push(format!("{field}: duplicate story '{id}'"));
        }
    }
}
