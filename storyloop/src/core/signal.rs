//! Completion markers printed by the coding agent.
//!
//! The agent ends a session with one of `TESTS_GENERATED: <id>`,
//! `STORY_DONE: <id>` or `BLOCKED: <reason>`. Markers are advisory; the loop
//! always re-checks the filesystem and the test suite before trusting them.

use std::sync::LazyLock;

use regex::Regex;

static TESTS_GENERATED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"TESTS_GENERATED:\s*(\S+)").expect("valid regex"));
static STORY_DONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"STORY_DONE:\s*(\S+)").expect("valid regex"));
static BLOCKED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"BLOCKED:\s*(.+)").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentSignal {
    TestsGenerated(String),
    StoryDone(String),
    Blocked(String),
    None,
}

/// Detect the agent's completion marker. `BLOCKED` wins over success markers.
pub fn detect_signal(output: &str) -> AgentSignal {
    if let Some(caps) = BLOCKED_RE.captures(output) {
        return AgentSignal::Blocked(caps[1].trim().to_string());
    }
    if let Some(caps) = TESTS_GENERATED_RE.captures(output) {
        return AgentSignal::TestsGenerated(caps[1].to_string());
    }
    if let Some(caps) = STORY_DONE_RE.captures(output) {
        return AgentSignal::StoryDone(caps[1].to_string());
    }
    AgentSignal::None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_each_marker() {
        assert_eq!(
            detect_signal("wrote tests\nTESTS_GENERATED: US-001\n"),
            AgentSignal::TestsGenerated("US-001".to_string())
        );
        assert_eq!(
            detect_signal("STORY_DONE: US-001"),
            AgentSignal::StoryDone("US-001".to_string())
        );
        assert_eq!(
            detect_signal("BLOCKED: missing database credentials\n"),
            AgentSignal::Blocked("missing database credentials".to_string())
        );
        assert_eq!(detect_signal("all good"), AgentSignal::None);
    }

    #[test]
    fn blocked_takes_precedence() {
        let output = "STORY_DONE: US-001\nBLOCKED: flaky network";
        assert_eq!(
            detect_signal(output),
            AgentSignal::Blocked("flaky network".to_string())
        );
    }
}
