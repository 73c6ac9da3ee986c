//! Regression safety net.
//!
//! Every committed story leaves its tests in the regression directory. Before
//! a new story may be committed, that whole suite must still pass. A broken
//! regression gets one fix attempt; if the suite still fails the story blocks.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::failure::{
    extract_failing_test, failing_test_or_unknown, regression_failure_context,
};
use crate::core::types::{BlockKind, Blocked, ErrorType, TestOutcome, Verdict};
use crate::io::agent::{FixRequest, Fixer};
use crate::io::test_runner::{TestRequest, TestRunner};

/// Result of one regression suite run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegressionRun {
    pub passed: bool,
    /// `None` when there was no regression directory to run.
    pub outcome: Option<TestOutcome>,
}

impl RegressionRun {
    fn vacuous() -> Self {
        Self {
            passed: true,
            outcome: None,
        }
    }

    pub fn raw_output(&self) -> &str {
        self.outcome
            .as_ref()
            .map_or("", |outcome| outcome.raw_output.as_str())
    }
}

/// Whether a story may be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegressionReport {
    pub story_id: String,
    pub tests_pass: bool,
    pub regression_pass: bool,
    pub ready_for_commit: bool,
    pub fix_applied: bool,
    /// Story test run that gated the regression check.
    pub story_outcome: TestOutcome,
}

pub struct RegressionHarness<'a, R: TestRunner, F: Fixer> {
    runner: &'a R,
    fixer: &'a F,
    regression_dir: PathBuf,
    regression_timeout: Duration,
    story_test_timeout: Duration,
}

impl<'a, R: TestRunner, F: Fixer> RegressionHarness<'a, R, F> {
    pub fn new(
        runner: &'a R,
        fixer: &'a F,
        regression_dir: impl Into<PathBuf>,
        regression_timeout: Duration,
        story_test_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            fixer,
            regression_dir: regression_dir.into(),
            regression_timeout,
            story_test_timeout,
        }
    }

    /// Run every migrated test.
    ///
    /// A missing directory or an empty collection passes. A timeout fails.
    #[instrument(skip_all, fields(dir = %self.regression_dir.display()))]
    pub fn run_regression_suite(&self) -> Result<RegressionRun> {
        if !self.regression_dir.is_dir() {
            info!("no regression directory, nothing to check");
            return Ok(RegressionRun::vacuous());
        }
        let outcome = self.runner.run(&TestRequest::new(
            &self.regression_dir,
            self.regression_timeout,
        ))?;
        let passed = outcome.is_pass_or_empty();
        if passed {
            info!(passed = outcome.passed, "regression suite passed");
        } else {
            warn!(status = ?outcome.status, "regression suite failed");
        }
        Ok(RegressionRun {
            passed,
            outcome: Some(outcome),
        })
    }

    /// Run the story's tests, then the regression suite, healing a regression at most once.
    ///
    /// Failing story tests short-circuit: the regression suite is not run and
    /// the report says the story is not ready.
    #[instrument(skip_all, fields(story_id = %story_id))]
    pub fn execute_story_with_regression(
        &self,
        story_id: &str,
        test_path: &Path,
    ) -> Result<Verdict<RegressionReport>> {
        if !test_path.is_file() {
            return Ok(Verdict::Blocked(Blocked::new(
                story_id,
                BlockKind::MissingTestArtifact,
                format!(
                    "test file {} missing before regression check",
                    test_path.display()
                ),
                String::new(),
            )));
        }

        let story_outcome = self
            .runner
            .run(&TestRequest::new(test_path, self.story_test_timeout))?;
        if !story_outcome.is_pass() {
            warn!(status = ?story_outcome.status, "story tests fail, skipping regression suite");
            return Ok(Verdict::Proceed(RegressionReport {
                story_id: story_id.to_string(),
                tests_pass: false,
                regression_pass: false,
                ready_for_commit: false,
                fix_applied: false,
                story_outcome,
            }));
        }

        let first = self.run_regression_suite()?;
        if first.passed {
            return Ok(Verdict::Proceed(RegressionReport {
                story_id: story_id.to_string(),
                tests_pass: true,
                regression_pass: true,
                ready_for_commit: true,
                fix_applied: false,
                story_outcome,
            }));
        }

        let broken = failing_test_or_unknown(first.raw_output());
        warn!(test = %broken, "{}", regression_failure_context(story_id, &broken));
        self.fixer.fix(&FixRequest {
            story_id,
            test_output: first.raw_output(),
            error_type: ErrorType::RegressionFailure,
        })?;

        let second = self.run_regression_suite()?;
        if second.passed {
            info!("regression healed by fix");
            return Ok(Verdict::Proceed(RegressionReport {
                story_id: story_id.to_string(),
                tests_pass: true,
                regression_pass: true,
                ready_for_commit: true,
                fix_applied: true,
                story_outcome,
            }));
        }

        let still_broken = extract_failing_test(second.raw_output()).unwrap_or(broken);
        Ok(Verdict::Blocked(Blocked::new(
            story_id,
            BlockKind::RegressionFixFailed,
            regression_failure_context(story_id, &still_broken),
            second.raw_output(),
        )))
    }
}
