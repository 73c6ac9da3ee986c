//! Moves a committed story's tests into the regression suite.
//!
//! The move is copy-then-delete. Every failure is logged and reported as
//! `false`; none of them stop the loop.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{info, instrument, warn};

use crate::io::atomic::copy_verified;
use crate::io::paths::TestLayout;

pub struct TestArtifactMigrator {
    layout: TestLayout,
}

impl TestArtifactMigrator {
    pub fn new(layout: TestLayout) -> Self {
        Self { layout }
    }

    /// Move the story's test file under the regression directory.
    ///
    /// Returns `false` without touching anything if the tests directory or the
    /// file is missing. If the original cannot be removed after a successful
    /// copy, both files are left in place and `false` is returned.
    #[instrument(skip_all, fields(story_id = %story_id))]
    pub fn move_to_regression(&self, story_id: &str) -> bool {
        self.move_with(story_id, |path: &Path| fs::remove_file(path))
    }

    fn move_with(&self, story_id: &str, remove_source: impl Fn(&Path) -> io::Result<()>) -> bool {
        let (Some(source), Some(dest)) = (
            self.layout.story_test_path(story_id),
            self.layout.regression_test_path(story_id),
        ) else {
            warn!("story id has no usable file name, test not migrated");
            return false;
        };
        if !self.layout.tests_dir.is_dir() {
            warn!(dir = %self.layout.tests_dir.display(), "tests directory missing, test not migrated");
            return false;
        }
        if !source.is_file() {
            warn!(path = %source.display(), "story test file missing, test not migrated");
            return false;
        }
        if let Err(err) = fs::create_dir_all(&self.layout.regression_dir) {
            warn!(dir = %self.layout.regression_dir.display(), %err, "cannot create regression directory");
            return false;
        }
        if let Err(err) = copy_verified(&source, &dest) {
            warn!(src = %source.display(), err = %format!("{err:#}"), "copy into regression suite failed");
            return false;
        }
        if let Err(err) = remove_source(&source) {
            warn!(path = %source.display(), %err, "test copied but original not removed");
            return false;
        }
        info!(dest = %dest.display(), "test moved to regression suite");
        true
    }
}

/// Move `tests/test_<id>.py` under `base_path` into `tests/regression/`.
pub fn move_test_to_regression(story_id: &str, base_path: &Path) -> bool {
    TestArtifactMigrator::new(TestLayout::pytest(base_path)).move_to_regression(story_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> tempfile::TempDir {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("tests")).expect("tests");
        temp
    }

    /// Verifies the moved file is byte-identical and the source is gone.
    #[test]
    fn moves_test_into_regression() {
        let temp = project();
        let src = temp.path().join("tests").join("test_US-050.py");
        fs::write(&src, "def test_a():\n    assert True\n").expect("write");

        assert!(move_test_to_regression("US-050", temp.path()));
        let dest = temp.path().join("tests").join("regression").join("test_US-050.py");
        assert_eq!(
            fs::read_to_string(&dest).expect("read"),
            "def test_a():\n    assert True\n"
        );
        assert!(!src.exists());
    }

    #[test]
    fn second_move_is_harmless() {
        let temp = project();
        fs::write(temp.path().join("tests").join("test_US-050.py"), "x").expect("write");
        assert!(move_test_to_regression("US-050", temp.path()));
        assert!(!move_test_to_regression("US-050", temp.path()));

        let regression: Vec<_> = fs::read_dir(temp.path().join("tests").join("regression"))
            .expect("list")
            .collect();
        assert_eq!(regression.len(), 1);
    }

    #[test]
    fn missing_file_or_tests_dir_returns_false() {
        let temp = project();
        assert!(!move_test_to_regression("US-404", temp.path()));

        let bare = tempfile::tempdir().expect("tempdir");
        assert!(!move_test_to_regression("US-404", bare.path()));
    }

    #[test]
    fn traversal_in_story_id_stays_inside_tests() {
        let temp = project();
        fs::write(temp.path().join("tests").join("test_etcpasswd.py"), "x").expect("write");

        assert!(move_test_to_regression("../etc/passwd", temp.path()));
        assert!(
            temp.path()
                .join("tests")
                .join("regression")
                .join("test_etcpasswd.py")
                .is_file()
        );
    }

    #[test]
    fn copy_failure_keeps_original() {
        let temp = project();
        let src = temp.path().join("tests").join("test_US-7.py");
        fs::write(&src, "original").expect("write");
        let blocker = temp.path().join("tests").join("regression").join("test_US-7.py");
        fs::create_dir_all(blocker.join("inner")).expect("blocker");

        assert!(!move_test_to_regression("US-7", temp.path()));
        assert_eq!(fs::read_to_string(&src).expect("read"), "original");
    }

    /// Verifies a failed delete after copying leaves the test in both places.
    #[test]
    fn undeletable_original_is_kept_alongside_copy() {
        let temp = project();
        let src = temp.path().join("tests").join("test_US-8.py");
        fs::write(&src, "def test_b():\n    pass\n").expect("write");
        let migrator = TestArtifactMigrator::new(TestLayout::pytest(temp.path()));

        let moved = migrator.move_with("US-8", |_: &Path| {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
        });

        assert!(!moved);
        let dest = temp.path().join("tests").join("regression").join("test_US-8.py");
        assert_eq!(
            fs::read_to_string(&src).expect("original"),
            fs::read_to_string(&dest).expect("copy")
        );
    }

    #[test]
    fn custom_layout_is_honoured() {
        let temp = project();
        let layout = TestLayout::new(temp.path(), "", "rs");
        fs::write(temp.path().join("tests").join("US-1.rs"), "#[test] fn a() {}").expect("write");

        assert!(TestArtifactMigrator::new(layout).move_to_regression("US-1"));
        assert!(temp.path().join("tests").join("regression").join("US-1.rs").is_file());
    }
}
