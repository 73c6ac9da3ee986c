//! Project scaffolding for `storyloop init`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info};

use crate::core::state::ExecutionState;
use crate::io::config::{StoryloopConfig, write_config};
use crate::io::history::HISTORY_HEADER;
use crate::io::paths::ProjectPaths;
use crate::io::state_store::write_state;

/// Options for `init_project`.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// If true, overwrite existing storyloop-owned files.
    pub force: bool,
}

/// Create the directory layout, default config, history header and initial state under `root`.
///
/// Directories are always created. Existing files are kept unless
/// `options.force` is set. PRDs and tests are never touched.
pub fn init_project(root: &Path, options: &InitOptions) -> Result<ProjectPaths> {
    let paths = ProjectPaths::new(root);
    if paths.storyloop_dir.exists() && !paths.storyloop_dir.is_dir() {
        return Err(anyhow!(
            "storyloop init: {} exists but is not a directory",
            paths.storyloop_dir.display()
        ));
    }

    for dir in [
        &paths.prds_dir,
        &paths.archive_dir,
        &paths.tests_dir,
        &paths.regression_dir,
        &paths.storyloop_dir,
    ] {
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    }

    if should_write(&paths.config_path, options) {
        write_config(&paths.config_path, &StoryloopConfig::default())?;
    }
    if should_write(&paths.history_path, options) {
        fs::write(&paths.history_path, HISTORY_HEADER)
            .with_context(|| format!("write file {}", paths.history_path.display()))?;
    }
    if should_write(&paths.state_path, options) {
        write_state(&paths.state_path, &ExecutionState::default())?;
    }
    info!(root = %root.display(), "project initialised");
    Ok(paths)
}

fn should_write(path: &Path, options: &InitOptions) -> bool {
    if options.force || !path.exists() {
        return true;
    }
    debug!(path = %path.display(), "keeping existing file");
    false
}
