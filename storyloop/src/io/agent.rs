//! Code agent abstraction.
//!
//! [`CodeAgent`] writes tests and implementations; [`Fixer`] gets exactly one
//! attempt at repairing a failure. Both only report whether the agent claims
//! success. Callers re-run the tests and treat that result as authoritative.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::Utc;
use tracing::{info, instrument, warn};

use super::config::StoryloopConfig;
use super::prd::Story;
use super::process::run_command;
use super::prompt::{PromptEngine, StoryPromptInput};
use crate::core::signal::{AgentSignal, detect_signal};
use crate::core::story_id::sanitize_story_id;
use crate::core::types::ErrorType;

/// Where a story's inputs and outputs live.
#[derive(Debug, Clone, Copy)]
pub struct AgentContext<'a> {
    pub prd_name: &'a str,
    pub prd_path: &'a Path,
    pub test_path: &'a Path,
}

/// Writes tests and implementation code for a story.
pub trait CodeAgent {
    /// Ask for the story's tests. Returns whether the agent reports success.
    fn generate_tests(&self, story: &Story, ctx: &AgentContext<'_>) -> Result<bool>;

    /// Ask for an implementation that makes the story's tests pass.
    fn implement(&self, story: &Story, ctx: &AgentContext<'_>) -> Result<bool>;
}

/// Payload of a single fix attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixRequest<'a> {
    pub story_id: &'a str,
    pub test_output: &'a str,
    pub error_type: ErrorType,
}

/// Makes one attempt at repairing failing tests.
pub trait Fixer {
    fn fix(&self, request: &FixRequest<'_>) -> Result<bool>;
}

/// Agent driven through a command line tool, the prompt passed as the last argument.
pub struct CliAgent {
    workdir: PathBuf,
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
    sessions_dir: PathBuf,
    prompts: PromptEngine,
}

struct AgentRun {
    signal: AgentSignal,
    timed_out: bool,
}

impl CliAgent {
    pub fn new(
        workdir: impl Into<PathBuf>,
        sessions_dir: impl Into<PathBuf>,
        config: &StoryloopConfig,
    ) -> Result<Self> {
        Ok(Self {
            workdir: workdir.into(),
            command: config.agent.command.clone(),
            timeout: config.agent_timeout(),
            output_limit_bytes: config.output_limit_bytes,
            sessions_dir: sessions_dir.into(),
            prompts: PromptEngine::new()?,
        })
    }

    fn display_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.workdir)
            .unwrap_or(path)
            .display()
            .to_string()
    }

    #[instrument(skip_all, fields(label = %label, story_id = %story_id, timeout_secs = self.timeout.as_secs()))]
    fn invoke(&self, label: &str, story_id: &str, prompt: &str) -> Result<AgentRun> {
        let (program, args) = match self.command.split_first() {
            Some((program, args)) => (program.as_str(), args),
            None => return Err(anyhow!("agent command is empty")),
        };
        let mut cmd = Command::new(program);
        cmd.args(args).arg(prompt).current_dir(&self.workdir);

        let transcript = self.sessions_dir.join(format!(
            "{}-{label}-{}.log",
            Utc::now().format("%Y%m%dT%H%M%S"),
            sanitize_story_id(story_id)
        ));
        info!(transcript = %transcript.display(), "starting agent session");
        let output = run_command(cmd, self.timeout, self.output_limit_bytes, Some(&transcript))?;
        let text = output.combined_text(self.timeout);
        let signal = detect_signal(&text);

        if output.timed_out {
            warn!("agent session timed out");
        } else if !output.status.success() {
            warn!(exit_code = ?output.exit_code(), "agent exited with failure");
        }
        if let AgentSignal::Blocked(reason) = &signal {
            warn!(reason = %reason, "agent reported blocked");
        }
        Ok(AgentRun {
            signal,
            timed_out: output.timed_out,
        })
    }
}

impl CodeAgent for CliAgent {
    fn generate_tests(&self, story: &Story, ctx: &AgentContext<'_>) -> Result<bool> {
        let prd_text = fs::read_to_string(ctx.prd_path).ok();
        let test_path = self.display_path(ctx.test_path);
        let input = StoryPromptInput {
            story,
            prd_name: ctx.prd_name,
            prd_text: prd_text.as_deref(),
            test_path: &test_path,
            test_source: None,
        };
        let prompt = self.prompts.render_test_generation(&input)?;
        let run = self.invoke("tests", &story.id, &prompt)?;
        Ok(!run.timed_out && matches!(run.signal, AgentSignal::TestsGenerated(_)))
    }

    fn implement(&self, story: &Story, ctx: &AgentContext<'_>) -> Result<bool> {
        let test_source = fs::read_to_string(ctx.test_path).ok();
        let test_path = self.display_path(ctx.test_path);
        let input = StoryPromptInput {
            story,
            prd_name: ctx.prd_name,
            prd_text: None,
            test_path: &test_path,
            test_source: test_source.as_deref(),
        };
        let prompt = self.prompts.render_implementation(&input)?;
        let run = self.invoke("implement", &story.id, &prompt)?;
        Ok(!run.timed_out && matches!(run.signal, AgentSignal::StoryDone(_)))
    }
}

impl Fixer for CliAgent {
    fn fix(&self, request: &FixRequest<'_>) -> Result<bool> {
        let prompt =
            self.prompts
                .render_fix(request.story_id, request.error_type, request.test_output)?;
        let label = match request.error_type {
            ErrorType::TestFailure => "fix",
            ErrorType::RegressionFailure => "fix-regression",
        };
        let run = self.invoke(label, request.story_id, &prompt)?;
        Ok(!run.timed_out && matches!(run.signal, AgentSignal::StoryDone(_)))
    }
}
