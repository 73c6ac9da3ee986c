//! Loop configuration stored under `.storyloop/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use super::atomic::write_atomic;
use super::paths::TestLayout;

/// Loop configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields fall back to
/// the defaults below, and a missing file means all defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoryloopConfig {
    /// Wall-clock bound for one regression suite run, in seconds.
    pub regression_timeout_secs: u64,

    /// Wall-clock bound for one story test run, in seconds.
    pub story_test_timeout_secs: u64,

    /// Wall-clock bound for one code agent invocation, in seconds.
    pub agent_timeout_secs: u64,

    /// Truncate captured stdout/stderr of child processes beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Persist per-story phases to `.storyloop/phases.json` between runs.
    pub persist_phases: bool,

    pub tests: TestsConfig,

    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TestsConfig {
    /// Test runner argv; the suite path is appended as the last argument.
    pub command: Vec<String>,
    /// Exit code the runner uses for "no tests collected".
    pub no_tests_exit_code: i32,
    pub file_prefix: String,
    pub file_extension: String,
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            command: vec!["pytest".to_string(), "-v".to_string()],
            no_tests_exit_code: 5,
            file_prefix: "test_".to_string(),
            file_extension: "py".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent argv; the rendered prompt is appended as the last argument.
    pub command: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: [
                "claude",
                "--print",
                "--model",
                "sonnet",
                "--dangerously-skip-permissions",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

impl Default for StoryloopConfig {
    fn default() -> Self {
        Self {
            regression_timeout_secs: 300,
            story_test_timeout_secs: 30 * 60,
            agent_timeout_secs: 60 * 60,
            output_limit_bytes: 200_000,
            persist_phases: false,
            tests: TestsConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

impl StoryloopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.regression_timeout_secs == 0 {
            return Err(anyhow!("regression_timeout_secs must be > 0"));
        }
        if self.story_test_timeout_secs == 0 {
            return Err(anyhow!("story_test_timeout_secs must be > 0"));
        }
        if self.agent_timeout_secs == 0 {
            return Err(anyhow!("agent_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if is_blank_command(&self.tests.command) {
            return Err(anyhow!("tests.command must be a non-empty array"));
        }
        if is_blank_command(&self.agent.command) {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        Ok(())
    }

    pub fn regression_timeout(&self) -> Duration {
        Duration::from_secs(self.regression_timeout_secs)
    }

    pub fn story_test_timeout(&self) -> Duration {
        Duration::from_secs(self.story_test_timeout_secs)
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    /// Test file layout rooted at `base`.
    pub fn test_layout(&self, base: &Path) -> TestLayout {
        TestLayout::new(base, &self.tests.file_prefix, &self.tests.file_extension)
    }
}

fn is_blank_command(command: &[String]) -> bool {
    command.first().is_none_or(|program| program.trim().is_empty())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `StoryloopConfig::default()`.
pub fn load_config(path: &Path) -> Result<StoryloopConfig> {
    if !path.exists() {
        let cfg = StoryloopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: StoryloopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &StoryloopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, StoryloopConfig::default());
        assert_eq!(cfg.regression_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = StoryloopConfig::default();
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "agent_timeout_secs = 90\n\n[tests]\ncommand = [\"cargo\", \"test\"]\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.agent_timeout_secs, 90);
        assert_eq!(cfg.tests.command, vec!["cargo", "test"]);
        assert_eq!(cfg.tests.no_tests_exit_code, 5);
        assert_eq!(cfg.regression_timeout_secs, 300);
        assert_eq!(cfg.agent, AgentConfig::default());
    }

    #[test]
    fn rejects_zero_timeout_and_empty_command() {
        let cfg = StoryloopConfig {
            regression_timeout_secs: 0,
            ..StoryloopConfig::default()
        };
        assert!(cfg.validate().is_err());

        let mut cfg = StoryloopConfig::default();
        cfg.tests.command = vec![" ".to_string()];
        let err = cfg.validate().expect_err("blank command");
        assert!(err.to_string().contains("tests.command"));
    }
}
