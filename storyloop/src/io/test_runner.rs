//! Test suite execution.
//!
//! The [`TestRunner`] trait decouples the controller and regression harness
//! from the actual test tool. Tests use scripted runners that return
//! predetermined outcomes without spawning processes.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, instrument, warn};

use super::process::run_command;
use crate::core::failure::parse_test_counts;
use crate::core::types::{TestOutcome, TestStatus};

/// One suite invocation: a test file or directory plus its time bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRequest {
    pub suite: PathBuf,
    pub timeout: Duration,
}

impl TestRequest {
    pub fn new(suite: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            suite: suite.into(),
            timeout,
        }
    }
}

/// Abstraction over test tools.
pub trait TestRunner {
    /// Run the suite and classify the result.
    ///
    /// Test failures and timeouts are outcomes, not errors; `Err` is reserved
    /// for being unable to run the tool at all.
    fn run(&self, request: &TestRequest) -> Result<TestOutcome>;
}

/// Runner that spawns a configured command with the suite path appended.
#[derive(Debug, Clone)]
pub struct CommandTestRunner {
    workdir: PathBuf,
    command: Vec<String>,
    no_tests_exit_code: i32,
    output_limit_bytes: usize,
}

impl CommandTestRunner {
    pub fn new(
        workdir: impl Into<PathBuf>,
        command: Vec<String>,
        no_tests_exit_code: i32,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            workdir: workdir.into(),
            command,
            no_tests_exit_code,
            output_limit_bytes,
        }
    }

    fn build_command(&self, suite: &Path) -> Command {
        let (program, args) = match self.command.split_first() {
            Some((program, args)) => (program.as_str(), args),
            None => ("pytest", &[][..]),
        };
        let mut cmd = Command::new(program);
        cmd.args(args).arg(suite).current_dir(&self.workdir);
        cmd
    }

    fn classify(&self, exit_code: Option<i32>, timed_out: bool) -> TestStatus {
        if timed_out {
            TestStatus::TimedOut
        } else if exit_code == Some(0) {
            TestStatus::Passed
        } else if exit_code == Some(self.no_tests_exit_code) {
            TestStatus::NoTestsCollected
        } else {
            TestStatus::Failed
        }
    }
}

impl TestRunner for CommandTestRunner {
    #[instrument(skip_all, fields(suite = %request.suite.display(), timeout_secs = request.timeout.as_secs()))]
    fn run(&self, request: &TestRequest) -> Result<TestOutcome> {
        let output = run_command(
            self.build_command(&request.suite),
            request.timeout,
            self.output_limit_bytes,
            None,
        )?;
        let status = self.classify(output.exit_code(), output.timed_out);
        let raw_output = output.combined_text(request.timeout);
        let counts = parse_test_counts(&raw_output);
        match status {
            TestStatus::Passed | TestStatus::NoTestsCollected => {
                info!(?status, passed = counts.passed, "test suite finished");
            }
            TestStatus::Failed | TestStatus::TimedOut => {
                warn!(?status, passed = counts.passed, failed = counts.failed, "test suite failed");
            }
        }
        Ok(TestOutcome {
            status,
            passed: counts.passed,
            total: counts.total(),
            raw_output,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh_runner(workdir: &Path, script: &str) -> CommandTestRunner {
        // `sh -c <script> sh <suite>` exposes the suite path as `$1`.
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            script.to_string(),
            "sh".to_string(),
        ];
        CommandTestRunner::new(workdir, command, 5, 10_000)
    }

    fn request(suite: &str) -> TestRequest {
        TestRequest::new(suite, Duration::from_secs(10))
    }

    #[test]
    fn zero_exit_is_pass_with_counts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = sh_runner(temp.path(), "echo \"$1\"; echo '3 passed in 0.01s'");
        let outcome = runner.run(&request("tests/test_US-1.py")).expect("run");
        assert_eq!(outcome.status, TestStatus::Passed);
        assert_eq!((outcome.passed, outcome.total), (3, 3));
        assert!(outcome.raw_output.contains("tests/test_US-1.py"));
    }

    #[test]
    fn nonzero_exit_is_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = sh_runner(
            temp.path(),
            "echo 'FAILED tests/test_US-1.py::test_a'; echo '1 failed, 2 passed'; exit 1",
        );
        let outcome = runner.run(&request("tests")).expect("run");
        assert_eq!(outcome.status, TestStatus::Failed);
        assert_eq!((outcome.passed, outcome.total), (2, 3));
        assert!(!outcome.is_pass_or_empty());
    }

    /// Verifies pytest's "no tests collected" exit code is not treated as failure.
    #[test]
    fn configured_exit_code_means_no_tests() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = sh_runner(temp.path(), "echo 'collected 0 items'; exit 5");
        let outcome = runner.run(&request("tests/regression")).expect("run");
        assert_eq!(outcome.status, TestStatus::NoTestsCollected);
        assert!(outcome.is_pass_or_empty());
    }

    #[test]
    fn collection_error_is_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = sh_runner(temp.path(), "echo 'ERROR collecting'; exit 2");
        let outcome = runner.run(&request("tests")).expect("run");
        assert_eq!(outcome.status, TestStatus::Failed);
    }

    #[test]
    fn timeout_is_reported_as_outcome() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = sh_runner(temp.path(), "exec sleep 5");
        let outcome = runner
            .run(&TestRequest::new("tests", Duration::from_millis(200)))
            .expect("run");
        assert_eq!(outcome.status, TestStatus::TimedOut);
        assert!(outcome.raw_output.contains("killed after"));
    }
}
