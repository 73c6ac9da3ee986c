//! Git adapter for story commits.
//!
//! Each completed story becomes exactly one commit, so we keep a small,
//! explicit wrapper around `git` subprocess calls.

use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument};

/// Version control as seen by the loop: commit everything, get an id back.
pub trait Vcs {
    /// Stage all changes, commit them with `message`, and return the commit id.
    ///
    /// Errors when there is nothing to commit.
    fn commit(&self, message: &str) -> Result<String>;
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Return the current HEAD short SHA.
    pub fn head_short_sha(&self, len: usize) -> Result<String> {
        let arg = format!("--short={len}");
        let out = self.run_capture(&["rev-parse", &arg, "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

impl Vcs for Git {
    fn commit(&self, message: &str) -> Result<String> {
        self.add_all()?;
        if !self.commit_staged(message)? {
            return Err(anyhow!("nothing to commit for '{message}'"));
        }
        let sha = self.head_short_sha(7)?;
        info!(commit = %sha, message, "committed");
        Ok(sha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn init_repo(path: &Path) -> Git {
        let git = Git::new(path);
        git.run_checked(&["init", "-q"]).expect("git init");
        git.run_checked(&["config", "user.email", "loop@example.com"])
            .expect("email");
        git.run_checked(&["config", "user.name", "Story Loop"])
            .expect("name");
        git
    }

    #[test]
    fn commit_returns_short_sha() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = init_repo(temp.path());
        fs::write(temp.path().join("a.txt"), "a").expect("write");

        let sha = git.commit("feat: add a (US-001)").expect("commit");
        assert_eq!(sha.len(), 7);
        assert_eq!(git.head_short_sha(7).expect("head"), sha);
        assert!(!git.has_staged_changes().expect("staged"));
    }

    #[test]
    fn commit_without_changes_errors() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = init_repo(temp.path());
        fs::write(temp.path().join("a.txt"), "a").expect("write");
        git.commit("feat: first (US-001)").expect("commit");

        let err = git.commit("feat: empty (US-002)").expect_err("nothing staged");
        assert!(err.to_string().contains("nothing to commit"));
    }
}
