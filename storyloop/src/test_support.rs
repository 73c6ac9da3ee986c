//! Scripted test doubles and fixtures for loop tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde_json::json;
use tempfile::TempDir;

use crate::core::types::{ErrorType, TestOutcome, TestStatus};
use crate::io::agent::{AgentContext, CodeAgent, FixRequest, Fixer};
use crate::io::git::Vcs;
use crate::io::paths::ProjectPaths;
use crate::io::prd::Story;
use crate::io::test_runner::{TestRequest, TestRunner};

/// Passing outcome with `n` tests.
pub fn pass(n: u32) -> TestOutcome {
    TestOutcome {
        status: TestStatus::Passed,
        passed: n,
        total: n,
        raw_output: format!("{n} passed in 0.01s"),
    }
}

/// Failing outcome carrying `output` as the runner's text.
pub fn fail(output: &str) -> TestOutcome {
    TestOutcome {
        status: TestStatus::Failed,
        passed: 0,
        total: 1,
        raw_output: output.to_string(),
    }
}

pub fn no_tests() -> TestOutcome {
    TestOutcome {
        status: TestStatus::NoTestsCollected,
        passed: 0,
        total: 0,
        raw_output: "collected 0 items".to_string(),
    }
}

pub fn timed_out() -> TestOutcome {
    TestOutcome {
        status: TestStatus::TimedOut,
        passed: 0,
        total: 0,
        raw_output: "[killed after 300s timeout]".to_string(),
    }
}

/// Story with a derived title and one acceptance criterion.
pub fn story(id: &str) -> Story {
    Story {
        id: id.to_string(),
        title: format!("{id} title"),
        acceptance_criteria: vec![format!("{id} works")],
    }
}

/// Test runner that replays queued outcomes in order and records every request.
#[derive(Debug, Default)]
pub struct ScriptedTestRunner {
    outcomes: RefCell<VecDeque<TestOutcome>>,
    requests: RefCell<Vec<TestRequest>>,
}

impl ScriptedTestRunner {
    pub fn new(outcomes: impl IntoIterator<Item = TestOutcome>) -> Self {
        Self {
            outcomes: RefCell::new(outcomes.into_iter().collect()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn push(&self, outcome: TestOutcome) {
        self.outcomes.borrow_mut().push_back(outcome);
    }

    pub fn requests(&self) -> Vec<TestRequest> {
        self.requests.borrow().clone()
    }

    /// Suites that were run, in order.
    pub fn suites(&self) -> Vec<PathBuf> {
        self.requests
            .borrow()
            .iter()
            .map(|request| request.suite.clone())
            .collect()
    }

    pub fn remaining(&self) -> usize {
        self.outcomes.borrow().len()
    }
}

impl TestRunner for ScriptedTestRunner {
    fn run(&self, request: &TestRequest) -> Result<TestOutcome> {
        self.requests.borrow_mut().push(request.clone());
        self.outcomes
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted test runner exhausted at {}", request.suite.display()))
    }
}

/// Agent call as observed by [`ScriptedAgent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentCall {
    GenerateTests(String),
    Implement(String),
    Fix {
        story_id: String,
        error_type: ErrorType,
        test_output: String,
    },
}

/// Agent double with fixed answers.
///
/// By default it claims success everywhere and writes a one-test file when
/// asked to generate tests.
#[derive(Debug)]
pub struct ScriptedAgent {
    writes_test_files: bool,
    generate_result: bool,
    implement_result: bool,
    fix_result: bool,
    calls: RefCell<Vec<AgentCall>>,
    fix_count: Cell<usize>,
}

impl Default for ScriptedAgent {
    fn default() -> Self {
        Self {
            writes_test_files: true,
            generate_result: true,
            implement_result: true,
            fix_result: true,
            calls: RefCell::new(Vec::new()),
            fix_count: Cell::new(0),
        }
    }
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim test generation succeeded without writing any file.
    pub fn without_test_files(mut self) -> Self {
        self.writes_test_files = false;
        self
    }

    pub fn with_fix_result(mut self, result: bool) -> Self {
        self.fix_result = result;
        self
    }

    pub fn with_implement_result(mut self, result: bool) -> Self {
        self.implement_result = result;
        self
    }

    pub fn calls(&self) -> Vec<AgentCall> {
        self.calls.borrow().clone()
    }

    pub fn fix_count(&self) -> usize {
        self.fix_count.get()
    }

    pub fn fix_calls(&self) -> Vec<AgentCall> {
        self.calls
            .borrow()
            .iter()
            .filter(|call| matches!(call, AgentCall::Fix { .. }))
            .cloned()
            .collect()
    }
}

impl CodeAgent for ScriptedAgent {
    fn generate_tests(&self, story: &Story, ctx: &AgentContext<'_>) -> Result<bool> {
        self.calls
            .borrow_mut()
            .push(AgentCall::GenerateTests(story.id.clone()));
        if self.writes_test_files {
            if let Some(parent) = ctx.test_path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
            let body = format!(
                "def test_{}():\n    assert False\n",
                story.id.to_lowercase().replace('-', "_")
            );
            fs::write(ctx.test_path, body)
                .with_context(|| format!("write {}", ctx.test_path.display()))?;
        }
        Ok(self.generate_result)
    }

    fn implement(&self, story: &Story, _ctx: &AgentContext<'_>) -> Result<bool> {
        self.calls
            .borrow_mut()
            .push(AgentCall::Implement(story.id.clone()));
        Ok(self.implement_result)
    }
}

impl Fixer for ScriptedAgent {
    fn fix(&self, request: &FixRequest<'_>) -> Result<bool> {
        self.fix_count.set(self.fix_count.get() + 1);
        self.calls.borrow_mut().push(AgentCall::Fix {
            story_id: request.story_id.to_string(),
            error_type: request.error_type,
            test_output: request.test_output.to_string(),
        });
        Ok(self.fix_result)
    }
}

/// VCS double that hands out sequential commit ids.
#[derive(Debug, Default)]
pub struct RecordingVcs {
    messages: RefCell<Vec<String>>,
}

impl RecordingVcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.borrow().clone()
    }
}

impl Vcs for RecordingVcs {
    fn commit(&self, message: &str) -> Result<String> {
        let mut messages = self.messages.borrow_mut();
        messages.push(message.to_string());
        Ok(format!("c{:06}", messages.len()))
    }
}

/// Temporary project directory with the standard layout.
pub struct TestProject {
    temp: TempDir,
    paths: ProjectPaths,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create temp dir")?;
        let paths = ProjectPaths::new(temp.path());
        fs::create_dir_all(&paths.prds_dir).context("create prds dir")?;
        fs::create_dir_all(&paths.tests_dir).context("create tests dir")?;
        Ok(Self { temp, paths })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn paths(&self) -> &ProjectPaths {
        &self.paths
    }

    /// Write `prds/<name>` with the given story ids.
    pub fn write_prd(&self, name: &str, story_ids: &[&str]) -> Result<PathBuf> {
        write_prd(&self.paths.prds_dir, name, story_ids)
    }

    /// Write an existing test file for `story_id` at `tests/test_<id>.py`.
    pub fn write_story_test(&self, story_id: &str) -> Result<PathBuf> {
        let path = self.paths.tests_dir.join(format!("test_{story_id}.py"));
        fs::write(&path, "def test_story():\n    assert True\n")
            .with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }
}

/// Write a PRD file named `name` into `dir` with the given story ids.
pub fn write_prd(dir: &Path, name: &str, story_ids: &[&str]) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let stories: Vec<_> = story_ids
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "title": format!("{id} title"),
                "acceptanceCriteria": [format!("{id} works")],
            })
        })
        .collect();
    let doc = json!({ "title": name, "userStories": stories });
    let path = dir.join(name);
    let mut buf = serde_json::to_string_pretty(&doc)?;
    buf.push('\n');
    fs::write(&path, buf).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}
