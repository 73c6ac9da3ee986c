//! Per-story phase state machine: test, implement, and at most one fix.
//!
//! The controller never trusts the agent's own verdict. After every agent
//! step it re-runs the story's tests, and that result alone decides whether
//! the story proceeds.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::phase::{Phase, PhaseTracker};
use crate::core::types::{BlockKind, Blocked, ErrorType, TestOutcome, Verdict};
use crate::io::agent::{AgentContext, CodeAgent, FixRequest, Fixer};
use crate::io::prd::Story;
use crate::io::test_runner::{TestRequest, TestRunner};

/// Result of a phase that did not block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseReport {
    pub story_id: String,
    /// Phase the story ended in.
    pub phase: Phase,
    pub tests_pass: bool,
    pub fix_applied: bool,
    /// Last story test run.
    pub outcome: TestOutcome,
}

/// Drives a single story through its phases.
pub struct StoryController<'a, R: TestRunner, A: CodeAgent, F: Fixer> {
    runner: &'a R,
    agent: &'a A,
    fixer: &'a F,
    phases: &'a mut dyn PhaseTracker,
    test_timeout: Duration,
}

impl<'a, R: TestRunner, A: CodeAgent, F: Fixer> StoryController<'a, R, A, F> {
    pub fn new(
        runner: &'a R,
        agent: &'a A,
        fixer: &'a F,
        phases: &'a mut dyn PhaseTracker,
        test_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            agent,
            fixer,
            phases,
            test_timeout,
        }
    }

    /// Run the story's tests before implementation.
    ///
    /// Passing tests are reported, not rejected; the caller may skip
    /// implementation in that case.
    #[instrument(skip_all, fields(story_id = %story.id))]
    pub fn run_test_phase(
        &mut self,
        story: &Story,
        ctx: &AgentContext<'_>,
    ) -> Result<Verdict<PhaseReport>> {
        self.phases.track_phase(&story.id, Phase::Test)?;
        if let Some(blocked) = missing_artifact(&story.id, ctx.test_path, Phase::Test) {
            return Ok(Verdict::Blocked(blocked));
        }
        let outcome = self.run_story_tests(ctx.test_path)?;
        let tests_pass = outcome.is_pass();
        if tests_pass {
            info!("story tests already pass before implementation");
        } else {
            debug!(status = ?outcome.status, "story tests fail before implementation");
        }
        Ok(Verdict::Proceed(PhaseReport {
            story_id: story.id.clone(),
            phase: Phase::Test,
            tests_pass,
            fix_applied: false,
            outcome,
        }))
    }

    /// Implement the story, then allow exactly one fix attempt if tests still fail.
    #[instrument(skip_all, fields(story_id = %story.id))]
    pub fn run_implement_phase(
        &mut self,
        story: &Story,
        ctx: &AgentContext<'_>,
    ) -> Result<Verdict<PhaseReport>> {
        self.phases.track_phase(&story.id, Phase::Implement)?;
        if let Some(blocked) = missing_artifact(&story.id, ctx.test_path, Phase::Implement) {
            return Ok(Verdict::Blocked(blocked));
        }

        let claimed = self.agent.implement(story, ctx)?;
        debug!(claimed, "implementation session finished");
        let outcome = self.run_story_tests(ctx.test_path)?;
        if outcome.is_pass() {
            info!(passed = outcome.passed, "story tests pass after implementation");
            return Ok(Verdict::Proceed(PhaseReport {
                story_id: story.id.clone(),
                phase: Phase::Implement,
                tests_pass: true,
                fix_applied: false,
                outcome,
            }));
        }

        warn!(status = ?outcome.status, "story tests fail after implementation, attempting fix");
        self.phases.track_phase(&story.id, Phase::Fix)?;
        let claimed = self.fixer.fix(&FixRequest {
            story_id: &story.id,
            test_output: &outcome.raw_output,
            error_type: ErrorType::TestFailure,
        })?;
        debug!(claimed, "fix session finished");

        let rerun = self.run_story_tests(ctx.test_path)?;
        if rerun.is_pass() {
            info!(passed = rerun.passed, "story tests pass after fix");
            return Ok(Verdict::Proceed(PhaseReport {
                story_id: story.id.clone(),
                phase: Phase::Fix,
                tests_pass: true,
                fix_applied: true,
                outcome: rerun,
            }));
        }

        warn!(status = ?rerun.status, "story tests still fail after fix");
        Ok(Verdict::Blocked(Blocked::new(
            &story.id,
            BlockKind::FixFailed,
            format!(
                "tests for story {} still failing after one fix attempt",
                story.id
            ),
            rerun.raw_output,
        )))
    }

    /// Test phase, then implementation unless the tests already pass.
    pub fn execute(
        &mut self,
        story: &Story,
        ctx: &AgentContext<'_>,
    ) -> Result<Verdict<PhaseReport>> {
        let report = match self.run_test_phase(story, ctx)? {
            Verdict::Proceed(report) => report,
            blocked @ Verdict::Blocked(_) => return Ok(blocked),
        };
        if report.tests_pass {
            return Ok(Verdict::Proceed(report));
        }
        self.run_implement_phase(story, ctx)
    }

    fn run_story_tests(&self, test_path: &Path) -> Result<TestOutcome> {
        self.runner
            .run(&TestRequest::new(test_path, self.test_timeout))
    }
}

fn missing_artifact(story_id: &str, test_path: &Path, phase: Phase) -> Option<Blocked> {
    if test_path.is_file() {
        return None;
    }
    warn!(story_id, test_path = %test_path.display(), %phase, "story test file missing");
    Some(Blocked::new(
        story_id,
        BlockKind::MissingTestArtifact,
        format!(
            "{phase} phase needs test file {} but it does not exist",
            test_path.display()
        ),
        String::new(),
    ))
}
