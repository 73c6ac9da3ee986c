//! Shared deterministic types for the story loop.
//!
//! These types are the contracts between the controller, the regression
//! harness and the loop driver. They carry no I/O and must stay stable across
//! runs since several of them are serialized into state and logs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of a single test-suite execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    /// The suite ran and every collected test passed.
    Passed,
    /// The suite ran and at least one test failed or errored during collection.
    Failed,
    /// The runner reported that no tests were collected.
    NoTestsCollected,
    /// The runner was killed after exceeding its timeout.
    TimedOut,
}

/// Result of running a test suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub status: TestStatus,
    /// Number of passing tests reported by the runner (0 when unknown).
    pub passed: u32,
    /// Number of tests reported by the runner (0 when unknown).
    pub total: u32,
    /// Combined stdout/stderr, kept for fix requests and block reports.
    pub raw_output: String,
}

impl TestOutcome {
    /// True only when the suite actually passed.
    pub fn is_pass(&self) -> bool {
        self.status == TestStatus::Passed
    }

    /// True when nothing failed: either a pass or an empty collection.
    pub fn is_pass_or_empty(&self) -> bool {
        matches!(
            self.status,
            TestStatus::Passed | TestStatus::NoTestsCollected
        )
    }
}

/// Why a fix is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// The story's own tests fail.
    TestFailure,
    /// The story's change broke a previously migrated regression test.
    RegressionFailure,
}

impl ErrorType {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::TestFailure => "test_failure",
            ErrorType::RegressionFailure => "regression_failure",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a story block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// The story's test file is absent when a phase needs it.
    MissingTestArtifact,
    /// The agent was asked for tests but no test file appeared.
    TestGenerationFailed,
    /// Story tests still fail after the single fix attempt.
    FixFailed,
    /// The regression suite still fails after the single fix attempt.
    RegressionFixFailed,
    /// Story tests failed when re-run right before commit.
    StoryTestsFailing,
}

impl BlockKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockKind::MissingTestArtifact => "missing_test_artifact",
            BlockKind::TestGenerationFailed => "test_generation_failed",
            BlockKind::FixFailed => "fix_failed",
            BlockKind::RegressionFixFailed => "regression_fix_failed",
            BlockKind::StoryTestsFailing => "story_tests_failing",
        }
    }
}

/// A story that cannot progress without a human.
///
/// Carries the failing test output so the operator sees exactly what the
/// final test run printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blocked {
    pub story_id: String,
    pub kind: BlockKind,
    pub reason: String,
    pub output: String,
}

impl Blocked {
    pub fn new(
        story_id: impl Into<String>,
        kind: BlockKind,
        reason: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            story_id: story_id.into(),
            kind,
            reason: reason.into(),
            output: output.into(),
        }
    }
}

impl fmt::Display for Blocked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "story {} blocked ({}): {}; human intervention required",
            self.story_id,
            self.kind.as_str(),
            self.reason
        )
    }
}

impl std::error::Error for Blocked {}

/// Outcome of a loop stage: either continue with a value or stop on a block.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict<T> {
    Proceed(T),
    Blocked(Blocked),
}

impl<T> Verdict<T> {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Verdict::Blocked(_))
    }

    pub fn blocked(&self) -> Option<&Blocked> {
        match self {
            Verdict::Proceed(_) => None,
            Verdict::Blocked(blocked) => Some(blocked),
        }
    }

    pub fn into_result(self) -> Result<T, Blocked> {
        match self {
            Verdict::Proceed(value) => Ok(value),
            Verdict::Blocked(blocked) => Err(blocked),
        }
    }
}
