//! The story loop behind `storyloop run`.
//!
//! One story at a time: generate tests if needed, run the phase controller,
//! gate on the regression suite, commit, migrate the tests, record completion.
//! When the PRD's queue is empty the loop archives it and moves to the next.

use std::fs;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument, warn};

use crate::archive::{AdvanceOutcome, AdvanceReport, ArchiveManager};
use crate::controller::StoryController;
use crate::core::commit::commit_message;
use crate::core::failure::count_test_functions;
use crate::core::phase::PhaseTracker;
use crate::core::types::{BlockKind, Blocked, Verdict};
use crate::io::agent::{AgentContext, CodeAgent, Fixer};
use crate::io::config::StoryloopConfig;
use crate::io::git::Vcs;
use crate::io::history::{
    BlockEntry, CompletionEntry, HistoryEntry, HistoryLog, TestGenerationEntry,
};
use crate::io::paths::{ProjectPaths, TestLayout};
use crate::io::prd::{Story, load_prd};
use crate::io::state_store::{Recovery, StateStore};
use crate::io::test_runner::TestRunner;
use crate::migrate::TestArtifactMigrator;
use crate::regression::RegressionHarness;

/// Progress notifications for the caller (the CLI prints them).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEvent {
    Advanced(AdvanceReport),
    StoryStarted {
        story_id: String,
        title: String,
        session: u32,
    },
    TestsGenerated {
        story_id: String,
        test_count: usize,
    },
    StoryCommitted {
        story_id: String,
        commit_id: String,
        migrated: bool,
    },
}

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// No PRD left to work on.
    QueueEmpty,
    /// A story needs human intervention.
    Blocked(Blocked),
    /// The current PRD has unfinished stories but nothing is queued.
    Held { prd: String, incomplete: Vec<String> },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub stories_completed: u32,
    pub stop: LoopStop,
}

/// Process stories until the backlog is empty, a story blocks, or the current PRD is held.
///
/// Errors are reserved for infrastructure failures (state or history writes,
/// process spawning, commits).
pub fn run_loop<R, A, V, F>(
    paths: &ProjectPaths,
    config: &StoryloopConfig,
    runner: &R,
    agent: &A,
    vcs: &V,
    phases: &mut dyn PhaseTracker,
    on_event: F,
) -> Result<LoopOutcome>
where
    R: TestRunner,
    A: CodeAgent + Fixer,
    V: Vcs,
    F: FnMut(&LoopEvent),
{
    let (mut store, recovery) = StateStore::open_or_recover(&paths.state_path)?;
    store.ensure_exists()?;
    let history = HistoryLog::open(&paths.history_path)?;
    let layout = config.test_layout(&paths.root);

    StoryLoop {
        paths,
        config,
        runner,
        agent,
        vcs,
        phases,
        on_event,
        archive: ArchiveManager::new(&paths.prds_dir),
        migrator: TestArtifactMigrator::new(layout.clone()),
        layout,
        store,
        history,
    }
    .run(recovery)
}

struct StoryLoop<'a, R, A, V, F> {
    paths: &'a ProjectPaths,
    config: &'a StoryloopConfig,
    runner: &'a R,
    agent: &'a A,
    vcs: &'a V,
    phases: &'a mut dyn PhaseTracker,
    on_event: F,
    archive: ArchiveManager,
    migrator: TestArtifactMigrator,
    layout: TestLayout,
    store: StateStore,
    history: HistoryLog,
}

impl<R, A, V, F> StoryLoop<'_, R, A, V, F>
where
    R: TestRunner,
    A: CodeAgent + Fixer,
    V: Vcs,
    F: FnMut(&LoopEvent),
{
    fn run(mut self, recovery: Option<Recovery>) -> Result<LoopOutcome> {
        let mut stories_completed = 0u32;
        if let Some(recovery) = recovery {
            let report = self.archive.reinitialize(&mut self.store, recovery.reason())?;
            if let Some(stop) = self.advanced(report) {
                return Ok(LoopOutcome {
                    stories_completed,
                    stop,
                });
            }
        }
        loop {
            let Some(story_id) = self.store.state().current_story.clone() else {
                let report = self.archive.load_next_prd(&mut self.store)?;
                match self.advanced(report) {
                    None => continue,
                    Some(stop) => {
                        return Ok(LoopOutcome {
                            stories_completed,
                            stop,
                        });
                    }
                }
            };

            match self.run_story(&story_id)? {
                Verdict::Proceed(()) => stories_completed += 1,
                Verdict::Blocked(blocked) => {
                    return Ok(LoopOutcome {
                        stories_completed,
                        stop: LoopStop::Blocked(blocked),
                    });
                }
            }
        }
    }

    /// Report an advance; `Some` when the loop has to stop.
    fn advanced(&mut self, report: AdvanceReport) -> Option<LoopStop> {
        (self.on_event)(&LoopEvent::Advanced(report.clone()));
        match report.outcome {
            AdvanceOutcome::Loaded { .. } => None,
            AdvanceOutcome::QueueEmpty => Some(LoopStop::QueueEmpty),
            AdvanceOutcome::Held { prd, incomplete } => Some(LoopStop::Held { prd, incomplete }),
        }
    }

    #[instrument(skip_all, fields(story_id = %story_id))]
    fn run_story(&mut self, story_id: &str) -> Result<Verdict<()>> {
        let session = self.store.increment_session_count()?;
        let prd_name = self
            .store
            .state()
            .current_prd
            .clone()
            .ok_or_else(|| anyhow!("story {story_id} is queued without a current prd"))?;
        let prd_path = self.paths.prds_dir.join(&prd_name);
        let story = load_story(&prd_path, story_id);
        info!(session, prd = %prd_name, "story started");
        (self.on_event)(&LoopEvent::StoryStarted {
            story_id: story_id.to_string(),
            title: story.title.clone(),
            session,
        });

        let verdict = self.work_story(&story, &prd_name, &prd_path, session)?;
        if let Verdict::Blocked(blocked) = &verdict {
            warn!(kind = blocked.kind.as_str(), reason = %blocked.reason, "story blocked");
            self.history.append(&HistoryEntry::Block(BlockEntry {
                story_id: story_id.to_string(),
                prd: prd_name,
                reason: blocked.reason.clone(),
                session,
            }))?;
        }
        Ok(verdict)
    }

    fn work_story(
        &mut self,
        story: &Story,
        prd_name: &str,
        prd_path: &Path,
        session: u32,
    ) -> Result<Verdict<()>> {
        let started = Instant::now();
        let Some(test_path) = self.layout.story_test_path(&story.id) else {
            return Ok(Verdict::Blocked(Blocked::new(
                &story.id,
                BlockKind::MissingTestArtifact,
                format!("story id '{}' yields no usable test file name", story.id),
                String::new(),
            )));
        };
        let ctx = AgentContext {
            prd_name,
            prd_path,
            test_path: &test_path,
        };

        if !test_path.is_file() {
            let claimed = self.agent.generate_tests(story, &ctx)?;
            if !test_path.is_file() {
                return Ok(Verdict::Blocked(Blocked::new(
                    &story.id,
                    BlockKind::TestGenerationFailed,
                    format!(
                        "test generation did not create {} (agent reported success: {claimed})",
                        test_path.display()
                    ),
                    String::new(),
                )));
            }
            let source = fs::read_to_string(&test_path)
                .with_context(|| format!("read {}", test_path.display()))?;
            let test_count = count_test_functions(&source);
            self.history
                .append(&HistoryEntry::TestGeneration(TestGenerationEntry {
                    story_id: story.id.clone(),
                    prd: prd_name.to_string(),
                    test_count,
                    session,
                }))?;
            (self.on_event)(&LoopEvent::TestsGenerated {
                story_id: story.id.clone(),
                test_count,
            });
        }

        let mut controller = StoryController::new(
            self.runner,
            self.agent,
            self.agent,
            &mut *self.phases,
            self.config.story_test_timeout(),
        );
        if let Verdict::Blocked(blocked) = controller.execute(story, &ctx)? {
            return Ok(Verdict::Blocked(blocked));
        }

        let harness = RegressionHarness::new(
            self.runner,
            self.agent,
            &self.layout.regression_dir,
            self.config.regression_timeout(),
            self.config.story_test_timeout(),
        );
        let report = match harness.execute_story_with_regression(&story.id, &test_path)? {
            Verdict::Proceed(report) => report,
            Verdict::Blocked(blocked) => return Ok(Verdict::Blocked(blocked)),
        };
        if !report.ready_for_commit {
            return Ok(Verdict::Blocked(Blocked::new(
                &story.id,
                BlockKind::StoryTestsFailing,
                format!("tests for story {} fail at the regression gate", story.id),
                report.story_outcome.raw_output,
            )));
        }

        let commit_id = self.vcs.commit(&commit_message(&story.id, &story.title))?;
        let migrated = self.migrator.move_to_regression(&story.id);
        self.store.mark_story_complete(&story.id)?;
        self.history.append(&HistoryEntry::Completion(CompletionEntry {
            story_id: story.id.clone(),
            prd: prd_name.to_string(),
            title: story.title.clone(),
            acceptance_criteria: story.acceptance_criteria.clone(),
            passed: report.story_outcome.passed,
            total: report.story_outcome.total,
            commit_id: commit_id.clone(),
            duration: started.elapsed(),
            session,
        }))?;
        info!(commit = %commit_id, migrated, "story complete");
        (self.on_event)(&LoopEvent::StoryCommitted {
            story_id: story.id.clone(),
            commit_id,
            migrated,
        });
        Ok(Verdict::Proceed(()))
    }
}

/// The story as written in its PRD, or a bare record if the PRD no longer has it.
fn load_story(prd_path: &Path, story_id: &str) -> Story {
    match load_prd(prd_path) {
        Ok(prd) => prd.story(story_id).cloned().unwrap_or_else(|| {
            warn!(prd = %prd_path.display(), story_id, "story not found in prd");
            Story::bare(story_id)
        }),
        Err(err) => {
            warn!(prd = %prd_path.display(), err = %format!("{err:#}"), "cannot read prd");
            Story::bare(story_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveStatus;
    use crate::core::phase::{InMemoryPhaseTracker, Phase};
    use crate::core::state::ExecutionState;
    use crate::io::state_store::write_state;
    use crate::test_support::{
        AgentCall, RecordingVcs, ScriptedAgent, ScriptedTestRunner, TestProject, fail, pass,
    };

    fn run(
        project: &TestProject,
        runner: &ScriptedTestRunner,
        agent: &ScriptedAgent,
        vcs: &RecordingVcs,
        phases: &mut InMemoryPhaseTracker,
    ) -> (LoopOutcome, Vec<LoopEvent>) {
        let mut events = Vec::new();
        let outcome = run_loop(
            project.paths(),
            &StoryloopConfig::default(),
            runner,
            agent,
            vcs,
            phases,
            |event| events.push(event.clone()),
        )
        .expect("loop");
        (outcome, events)
    }

    fn history(project: &TestProject) -> String {
        fs::read_to_string(&project.paths().history_path).expect("history")
    }

    #[test]
    fn empty_backlog_stops_with_queue_empty() {
        let project = TestProject::new().expect("project");
        let runner = ScriptedTestRunner::default();
        let agent = ScriptedAgent::new();
        let vcs = RecordingVcs::new();
        let mut phases = InMemoryPhaseTracker::new();

        let (outcome, _) = run(&project, &runner, &agent, &vcs, &mut phases);
        assert_eq!(outcome.stop, LoopStop::QueueEmpty);
        assert_eq!(outcome.stories_completed, 0);
        assert!(project.paths().state_path.is_file());
    }

    /// Verifies a single story goes generate, implement, regression, commit, migrate.
    #[test]
    fn story_runs_end_to_end() {
        let project = TestProject::new().expect("project");
        project.write_prd("001.json", &["US-001"]).expect("prd");
        // test phase fails, implementation passes, regression gate: story + suite.
        let runner = ScriptedTestRunner::new([fail("FAILED x"), pass(1), pass(1), pass(3)]);
        let agent = ScriptedAgent::new();
        let vcs = RecordingVcs::new();
        let mut phases = InMemoryPhaseTracker::new();
        std::fs::create_dir_all(&project.paths().regression_dir).expect("regression");

        let (outcome, events) = run(&project, &runner, &agent, &vcs, &mut phases);
        assert_eq!(outcome.stop, LoopStop::QueueEmpty);
        assert_eq!(outcome.stories_completed, 1);
        assert_eq!(vcs.messages(), vec!["feat: us-001 title (US-001)"]);
        assert_eq!(
            agent.calls(),
            vec![
                AgentCall::GenerateTests("US-001".to_string()),
                AgentCall::Implement("US-001".to_string()),
            ]
        );
        assert_eq!(phases.current_phase("US-001"), Some(Phase::Implement));
        assert!(
            project
                .paths()
                .regression_dir
                .join("test_US-001.py")
                .is_file()
        );
        assert!(project.paths().archive_dir.join("001.json").is_file());
        assert!(events.contains(&LoopEvent::TestsGenerated {
            story_id: "US-001".to_string(),
            test_count: 1,
        }));

        let log = history(&project);
        assert!(log.contains("Tests Generated for US-001"));
        assert!(log.contains("Story US-001 Complete"));
        assert!(log.contains("- **Commit:** c000001"));
    }

    #[test]
    fn already_passing_story_skips_implementation() {
        let project = TestProject::new().expect("project");
        project.write_prd("001.json", &["US-001"]).expect("prd");
        project.write_story_test("US-001").expect("test");
        let runner = ScriptedTestRunner::new([pass(2), pass(2)]);
        let agent = ScriptedAgent::new();
        let vcs = RecordingVcs::new();
        let mut phases = InMemoryPhaseTracker::new();

        let (outcome, _) = run(&project, &runner, &agent, &vcs, &mut phases);
        assert_eq!(outcome.stories_completed, 1);
        assert!(agent.calls().is_empty());
        assert_eq!(phases.current_phase("US-001"), Some(Phase::Test));
    }

    #[test]
    fn missing_generated_tests_block_the_story() {
        let project = TestProject::new().expect("project");
        project.write_prd("001.json", &["US-001"]).expect("prd");
        let runner = ScriptedTestRunner::default();
        let agent = ScriptedAgent::new().without_test_files();
        let vcs = RecordingVcs::new();
        let mut phases = InMemoryPhaseTracker::new();

        let (outcome, _) = run(&project, &runner, &agent, &vcs, &mut phases);
        let LoopStop::Blocked(blocked) = outcome.stop else {
            panic!("expected block, got {:?}", outcome.stop);
        };
        assert_eq!(blocked.kind, BlockKind::TestGenerationFailed);
        assert!(history(&project).contains("Story US-001 BLOCKED"));
        assert!(vcs.messages().is_empty());
    }

    #[test]
    fn failed_fix_blocks_and_keeps_story_queued() {
        let project = TestProject::new().expect("project");
        project.write_prd("001.json", &["US-001", "US-002"]).expect("prd");
        project.write_story_test("US-001").expect("test");
        let runner = ScriptedTestRunner::new([fail("a"), fail("b"), fail("c")]);
        let agent = ScriptedAgent::new().with_fix_result(false);
        let vcs = RecordingVcs::new();
        let mut phases = InMemoryPhaseTracker::new();

        let (outcome, _) = run(&project, &runner, &agent, &vcs, &mut phases);
        let LoopStop::Blocked(blocked) = outcome.stop else {
            panic!("expected block, got {:?}", outcome.stop);
        };
        assert_eq!(blocked.kind, BlockKind::FixFailed);
        assert_eq!(agent.fix_count(), 1);

        let state = StateStore::open(&project.paths().state_path).expect("state");
        assert_eq!(state.state().current_story.as_deref(), Some("US-001"));
        assert_eq!(state.state().session_count, 1);
    }

    /// Verifies a structurally broken state file is set aside and the queue restarts.
    #[test]
    fn corrupt_state_restarts_queue_from_first_prd() {
        let project = TestProject::new().expect("project");
        project.write_prd("001.json", &["US-1"]).expect("prd");
        project.write_prd("002.json", &["US-2"]).expect("prd");
        project.write_story_test("US-1").expect("test");
        project.write_story_test("US-2").expect("test");
        let corrupt = r#"{"current_prd":"001.json","current_story":null,"completed_stories":"US-1","remaining_stories":[]}"#;
        fs::write(&project.paths().state_path, corrupt).expect("state");
        // US-1: test phase + gate. US-2: test phase + gate + migrated regression suite.
        let runner = ScriptedTestRunner::new([pass(1), pass(1), pass(1), pass(1), pass(1)]);
        let agent = ScriptedAgent::new();
        let vcs = RecordingVcs::new();
        let mut phases = InMemoryPhaseTracker::new();

        let (outcome, events) = run(&project, &runner, &agent, &vcs, &mut phases);
        assert_eq!(outcome.stop, LoopStop::QueueEmpty);
        assert_eq!(outcome.stories_completed, 2);

        let LoopEvent::Advanced(first) = &events[0] else {
            panic!("expected advance first, got {:?}", events[0]);
        };
        assert!(matches!(first.archive, ArchiveStatus::Skipped(ref r) if r.contains("integrity")));
        assert!(matches!(
            first.outcome,
            AdvanceOutcome::Loaded { ref prd, .. } if prd == "001.json"
        ));

        let backup = project.paths().state_path.with_file_name("state.json.corrupt");
        assert_eq!(fs::read_to_string(backup).expect("backup"), corrupt);
        assert!(project.paths().archive_dir.join("001.json").is_file());
        assert!(project.paths().archive_dir.join("002.json").is_file());
        assert_eq!(runner.remaining(), 0);
    }

    #[test]
    fn held_prd_stops_without_touching_state() {
        let project = TestProject::new().expect("project");
        project.write_prd("a.json", &["US-1", "US-2"]).expect("prd");
        let held = ExecutionState {
            current_prd: Some("a.json".to_string()),
            completed_stories: vec!["US-1".to_string()],
            ..ExecutionState::default()
        };
        write_state(&project.paths().state_path, &held).expect("state");
        let runner = ScriptedTestRunner::default();
        let agent = ScriptedAgent::new();
        let vcs = RecordingVcs::new();
        let mut phases = InMemoryPhaseTracker::new();

        let (outcome, _) = run(&project, &runner, &agent, &vcs, &mut phases);
        assert_eq!(
            outcome.stop,
            LoopStop::Held {
                prd: "a.json".to_string(),
                incomplete: vec!["US-2".to_string()],
            }
        );
        assert!(project.paths().prds_dir.join("a.json").is_file());
    }
}
