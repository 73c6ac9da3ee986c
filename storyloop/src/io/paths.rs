//! Canonical project paths and story test file naming.

use std::path::{Path, PathBuf};

use crate::core::story_id::sanitize_story_id;

/// All canonical paths for a project root.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub prds_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub tests_dir: PathBuf,
    pub regression_dir: PathBuf,
    pub state_path: PathBuf,
    pub history_path: PathBuf,
    pub storyloop_dir: PathBuf,
    pub config_path: PathBuf,
    pub phases_path: PathBuf,
    pub sessions_dir: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let prds_dir = root.join("prds");
        let tests_dir = root.join("tests");
        let storyloop_dir = root.join(".storyloop");
        Self {
            root: root.clone(),
            archive_dir: prds_dir.join("archive"),
            prds_dir,
            regression_dir: tests_dir.join("regression"),
            tests_dir,
            state_path: root.join("state.json"),
            history_path: root.join("history.md"),
            config_path: storyloop_dir.join("config.toml"),
            phases_path: storyloop_dir.join("phases.json"),
            sessions_dir: storyloop_dir.join("sessions"),
            storyloop_dir,
        }
    }
}

/// Where story tests live and how their files are named.
///
/// Story tests are `<tests_dir>/<prefix><id>.<ext>`; once a story is
/// committed its file moves under `<regression_dir>` with the same name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestLayout {
    pub tests_dir: PathBuf,
    pub regression_dir: PathBuf,
    pub file_prefix: String,
    pub file_extension: String,
}

impl TestLayout {
    pub fn new(
        base: &Path,
        file_prefix: impl Into<String>,
        file_extension: impl Into<String>,
    ) -> Self {
        let tests_dir = base.join("tests");
        Self {
            regression_dir: tests_dir.join("regression"),
            tests_dir,
            file_prefix: file_prefix.into(),
            file_extension: file_extension.into(),
        }
    }

    /// pytest naming: `tests/test_<id>.py`.
    pub fn pytest(base: &Path) -> Self {
        Self::new(base, "test_", "py")
    }

    /// File name for a story's tests, or `None` if the id sanitizes to nothing.
    pub fn test_file_name(&self, story_id: &str) -> Option<String> {
        let safe = sanitize_story_id(story_id);
        if safe.is_empty() {
            return None;
        }
        let ext = self.file_extension.trim_start_matches('.');
        if ext.is_empty() {
            Some(format!("{}{safe}", self.file_prefix))
        } else {
            Some(format!("{}{safe}.{ext}", self.file_prefix))
        }
    }

    pub fn story_test_path(&self, story_id: &str) -> Option<PathBuf> {
        self.test_file_name(story_id)
            .map(|name| self.tests_dir.join(name))
    }

    pub fn regression_test_path(&self, story_id: &str) -> Option<PathBuf> {
        self.test_file_name(story_id)
            .map(|name| self.regression_dir.join(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_paths_are_rooted() {
        let paths = ProjectPaths::new("/work");
        assert_eq!(paths.archive_dir, PathBuf::from("/work/prds/archive"));
        assert_eq!(
            paths.regression_dir,
            PathBuf::from("/work/tests/regression")
        );
        assert_eq!(paths.state_path, PathBuf::from("/work/state.json"));
        assert_eq!(
            paths.config_path,
            PathBuf::from("/work/.storyloop/config.toml")
        );
    }

    #[test]
    fn pytest_layout_names_story_files() {
        let layout = TestLayout::pytest(Path::new("/work"));
        assert_eq!(
            layout.story_test_path("US-001"),
            Some(PathBuf::from("/work/tests/test_US-001.py"))
        );
        assert_eq!(
            layout.regression_test_path("US-001"),
            Some(PathBuf::from("/work/tests/regression/test_US-001.py"))
        );
    }

    /// Verifies traversal ids stay inside the tests directory.
    #[test]
    fn traversal_ids_stay_in_tests_dir() {
        let layout = TestLayout::pytest(Path::new("/work"));
        let path = layout.story_test_path("../../secret").expect("path");
        assert_eq!(path, PathBuf::from("/work/tests/test_secret.py"));
        assert_eq!(layout.story_test_path("../"), None);
    }

    #[test]
    fn extension_dot_is_optional() {
        let layout = TestLayout::new(Path::new("/w"), "story_", ".rs");
        assert_eq!(layout.test_file_name("US-1").as_deref(), Some("story_US-1.rs"));
    }
}
