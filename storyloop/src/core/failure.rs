//! Reading test runner output: counts, failing test names, block reasons.
//!
//! Handles pytest summaries (`5 passed, 1 failed in 0.12s`,
//! `FAILED tests/x.py::test_y`) and libtest output (`test a::b ... FAILED`).

use std::sync::LazyLock;

use regex::Regex;

/// Placeholder used when no failing test name can be recovered from output.
pub const UNKNOWN_TEST: &str = "unknown";

static PYTEST_COLLECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ERROR\s+collecting\s+(\S+)").expect("valid regex"));
static PYTEST_FAILED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(?:FAILED|ERROR)\s+(\S+)").expect("valid regex"));
static PYTEST_VERBOSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(\S+::\S+)\s+(?:FAILED|ERROR)").expect("valid regex"));
static LIBTEST_FAILED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^test\s+(\S+)\s+\.\.\.\s+FAILED").expect("valid regex"));
static PASSED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+passed").expect("valid regex"));
static FAILED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+failed").expect("valid regex"));
static ERRORS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+errors?\b").expect("valid regex"));
static PY_TEST_FN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:async\s+)?def\s+test_\w*\s*\(").expect("valid regex"));
static RUST_TEST_ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*#\[(?:\w+::)?test\]").expect("valid regex"));

/// Passed/failed counts summed over every summary line in `output`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestCounts {
    pub passed: u32,
    pub failed: u32,
}

impl TestCounts {
    pub fn total(self) -> u32 {
        self.passed.saturating_add(self.failed)
    }
}

/// Parse passed/failed counts; errors count as failures.
pub fn parse_test_counts(output: &str) -> TestCounts {
    TestCounts {
        passed: sum_captures(&PASSED_RE, output),
        failed: sum_captures(&FAILED_RE, output).saturating_add(sum_captures(&ERRORS_RE, output)),
    }
}

fn sum_captures(re: &Regex, output: &str) -> u32 {
    re.captures_iter(output)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u32>().ok())
        .fold(0u32, u32::saturating_add)
}

/// First failing test name found in `output`, if any.
///
/// A collection error names the file that could not be imported.
pub fn extract_failing_test(output: &str) -> Option<String> {
    [
        &*PYTEST_COLLECT_RE,
        &*PYTEST_FAILED_RE,
        &*PYTEST_VERBOSE_RE,
        &*LIBTEST_FAILED_RE,
    ]
    .into_iter()
    .find_map(|re| re.captures(output))
    .and_then(|caps| caps.get(1))
    .map(|m| m.as_str().to_string())
}

/// Failing test name, or [`UNKNOWN_TEST`] when it cannot be recovered.
pub fn failing_test_or_unknown(output: &str) -> String {
    extract_failing_test(output).unwrap_or_else(|| UNKNOWN_TEST.to_string())
}

/// Human-readable reason for a regression block.
pub fn regression_failure_context(story_id: &str, test_name: &str) -> String {
    format!("Story {story_id} broke regression test {test_name}")
}

/// Count test functions in a test source file (pytest `def test_*` or `#[test]`).
pub fn count_test_functions(source: &str) -> usize {
    PY_TEST_FN_RE.find_iter(source).count() + RUST_TEST_ATTR_RE.find_iter(source).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_pytest_short_summary_name() {
        let output = "\
============ short test summary info ============
FAILED tests/regression/test_BUG-001.py::test_interactive_mode - assert 1 == 2
1 failed, 4 passed in 0.31s
";
        assert_eq!(
            extract_failing_test(output).as_deref(),
            Some("tests/regression/test_BUG-001.py::test_interactive_mode")
        );
    }

    #[test]
    fn extracts_pytest_verbose_line() {
        let output = "tests/regression/test_US-002.py::test_logout FAILED [ 50%]\n";
        assert_eq!(
            extract_failing_test(output).as_deref(),
            Some("tests/regression/test_US-002.py::test_logout")
        );
    }

    #[test]
    fn extracts_libtest_failure() {
        let output = "running 2 tests\ntest auth::login_works ... ok\ntest auth::logout_works ... FAILED\n";
        assert_eq!(
            extract_failing_test(output).as_deref(),
            Some("auth::logout_works")
        );
    }

    #[test]
    fn collection_error_names_the_file() {
        let output = "\
==================================== ERRORS ====================================
_____________ ERROR collecting tests/regression/test_US-003.py _____________
ImportError while importing test module
=========================== short test summary info ============================
ERROR collecting tests/regression/test_US-003.py
!!!!!!!!!!!!!!!!!!!! Interrupted: 1 error during collection !!!!!!!!!!!!!!!!!!!!
";
        assert_eq!(
            extract_failing_test(output).as_deref(),
            Some("tests/regression/test_US-003.py")
        );
    }

    #[test]
    fn falls_back_to_unknown() {
        assert_eq!(failing_test_or_unknown("Segmentation fault"), UNKNOWN_TEST);
        assert_eq!(failing_test_or_unknown(""), UNKNOWN_TEST);
    }

    #[test]
    fn regression_context_names_story_and_test() {
        let reason =
            regression_failure_context("US-005", "tests/regression/test_US-002.py::test_logout");
        assert_eq!(
            reason,
            "Story US-005 broke regression test tests/regression/test_US-002.py::test_logout"
        );
    }

    #[test]
    fn parses_pytest_summary_counts() {
        let counts = parse_test_counts("===== 5 passed, 2 failed, 1 error in 0.12s =====");
        assert_eq!(counts, TestCounts { passed: 5, failed: 3 });
        assert_eq!(counts.total(), 8);
    }

    #[test]
    fn sums_libtest_result_lines() {
        let output = "\
test result: ok. 3 passed; 0 failed; 0 ignored
test result: FAILED. 1 passed; 2 failed; 0 ignored
";
        assert_eq!(
            parse_test_counts(output),
            TestCounts { passed: 4, failed: 2 }
        );
    }

    #[test]
    fn no_summary_means_zero_counts() {
        assert_eq!(parse_test_counts("collected 0 items"), TestCounts::default());
    }

    #[test]
    fn counts_python_and_rust_tests() {
        let python = "\
import pytest

def test_login():
    pass

async def test_async_flow():
    pass

def helper():
    pass
";
        assert_eq!(count_test_functions(python), 2);

        let rust = "#[test]\nfn a() {}\n\n#[tokio::test]\nasync fn b() {}\n";
        assert_eq!(count_test_functions(rust), 2);
    }
}
