//! PRD archiving and backlog advancement.
//!
//! A PRD leaves `prds/` only when the state file is sound and every one of its
//! stories is completed. Archiving copies the file into `prds/archive/`,
//! verifies the copy, and only then deletes the source. Failures here are
//! reported as values and logged; they never abort the loop.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use tracing::{info, instrument, warn};

use crate::io::atomic::copy_verified;
use crate::io::prd::{list_pending_prds, load_prd, prd_name};
use crate::io::state_store::{StateStore, check_state_file};

/// Why a PRD could not be archived. The source file is untouched in every case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveFailure {
    SourceMissing(PathBuf),
    CreateArchiveDir { dir: PathBuf, reason: String },
    Copy { dest: PathBuf, reason: String },
    /// The verified copy was removed again after the source could not be deleted.
    DeleteSource { source: PathBuf, reason: String },
}

impl fmt::Display for ArchiveFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceMissing(path) => write!(f, "source prd {} does not exist", path.display()),
            Self::CreateArchiveDir { dir, reason } => {
                write!(f, "cannot create archive directory {}: {reason}", dir.display())
            }
            Self::Copy { dest, reason } => {
                write!(f, "copy to {} failed: {reason}", dest.display())
            }
            Self::DeleteSource { source, reason } => write!(
                f,
                "archived copy rolled back, cannot delete {}: {reason}",
                source.display()
            ),
        }
    }
}

/// Move `prd_path` into `archive_dir` by copy, verify, delete.
///
/// Returns the archived path. On any failure the archive copy is gone and the
/// source is still in place.
pub fn archive_prd_atomic(prd_path: &Path, archive_dir: &Path) -> Result<PathBuf, ArchiveFailure> {
    archive_prd_with(prd_path, archive_dir, |path: &Path| fs::remove_file(path))
}

fn archive_prd_with(
    prd_path: &Path,
    archive_dir: &Path,
    remove_source: impl Fn(&Path) -> io::Result<()>,
) -> Result<PathBuf, ArchiveFailure> {
    if !prd_path.is_file() {
        return Err(ArchiveFailure::SourceMissing(prd_path.to_path_buf()));
    }
    fs::create_dir_all(archive_dir).map_err(|err| ArchiveFailure::CreateArchiveDir {
        dir: archive_dir.to_path_buf(),
        reason: err.to_string(),
    })?;

    let dest = archive_dir.join(prd_name(prd_path));
    copy_verified(prd_path, &dest).map_err(|err| ArchiveFailure::Copy {
        dest: dest.clone(),
        reason: format!("{err:#}"),
    })?;

    if let Err(err) = remove_source(prd_path) {
        if let Err(cleanup) = fs::remove_file(&dest) {
            warn!(dest = %dest.display(), err = %cleanup, "failed to roll back archive copy");
        }
        return Err(ArchiveFailure::DeleteSource {
            source: prd_path.to_path_buf(),
            reason: err.to_string(),
        });
    }
    Ok(dest)
}

/// What happened to the PRD that was current before advancing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveStatus {
    /// No PRD was loaded.
    NothingToArchive,
    Archived(PathBuf),
    /// A safety check failed; the PRD file was preserved.
    Skipped(String),
    Failed(ArchiveFailure),
}

/// Where the backlog stands after advancing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Loaded {
        prd: String,
        first_story: Option<String>,
        story_count: usize,
    },
    QueueEmpty,
    /// The current PRD still has unfinished stories. State was not modified.
    Held { prd: String, incomplete: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvanceReport {
    pub archive: ArchiveStatus,
    pub outcome: AdvanceOutcome,
}

/// Owner of the PRD queue directory and its archive.
#[derive(Debug, Clone)]
pub struct ArchiveManager {
    prds_dir: PathBuf,
    archive_dir: PathBuf,
}

impl ArchiveManager {
    pub fn new(prds_dir: impl Into<PathBuf>) -> Self {
        let prds_dir = prds_dir.into();
        Self {
            archive_dir: prds_dir.join("archive"),
            prds_dir,
        }
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Archive the current PRD if it is finished, then load the next pending one.
    ///
    /// Errors only when the state cannot be saved or the next PRD cannot be
    /// read. Archive problems end up in [`AdvanceReport::archive`].
    #[instrument(skip_all, fields(current_prd = ?store.state().current_prd))]
    pub fn load_next_prd(&self, store: &mut StateStore) -> Result<AdvanceReport> {
        let mut excluded: Vec<String> = Vec::new();
        let archive = match store.state().current_prd.clone() {
            None => ArchiveStatus::NothingToArchive,
            Some(current) => {
                let problems = check_state_file(store.path());
                if !problems.is_empty() {
                    warn!(prd = %current, ?problems, "state failed integrity check, archive skipped");
                    ArchiveStatus::Skipped(format!(
                        "state integrity check failed: {}",
                        problems.join("; ")
                    ))
                } else {
                    let prd_path = self.prds_dir.join(&current);
                    match self.incomplete_stories(store, &prd_path) {
                        Err(reason) => {
                            warn!(prd = %current, %reason, "cannot verify prd, archive skipped");
                            excluded.push(current);
                            ArchiveStatus::Skipped(reason)
                        }
                        Ok(incomplete) if !incomplete.is_empty() => {
                            warn!(
                                prd = %current,
                                incomplete = %incomplete.join(", "),
                                "prd has incomplete stories, archive skipped"
                            );
                            let reason = format!("incomplete stories: {}", incomplete.join(", "));
                            return Ok(AdvanceReport {
                                archive: ArchiveStatus::Skipped(reason),
                                outcome: AdvanceOutcome::Held {
                                    prd: current,
                                    incomplete,
                                },
                            });
                        }
                        Ok(_) => match archive_prd_atomic(&prd_path, &self.archive_dir) {
                            Ok(dest) => {
                                info!(prd = %current, dest = %dest.display(), "prd archived");
                                ArchiveStatus::Archived(dest)
                            }
                            Err(failure) => {
                                warn!(prd = %current, %failure, "prd archive failed");
                                excluded.push(current);
                                ArchiveStatus::Failed(failure)
                            }
                        },
                    }
                }
            }
        };

        let outcome = self.load_first_pending(store, &excluded)?;
        Ok(AdvanceReport { archive, outcome })
    }

    /// Restart the queue from the first pending PRD without archiving anything.
    ///
    /// Used when the saved state could not be trusted; `reason` is reported as
    /// the skipped archive.
    pub fn reinitialize(&self, store: &mut StateStore, reason: String) -> Result<AdvanceReport> {
        warn!(%reason, "archive skipped, reloading queue from first prd");
        let outcome = self.load_first_pending(store, &[])?;
        Ok(AdvanceReport {
            archive: ArchiveStatus::Skipped(reason),
            outcome,
        })
    }

    fn load_first_pending(
        &self,
        store: &mut StateStore,
        excluded: &[String],
    ) -> Result<AdvanceOutcome> {
        let next = list_pending_prds(&self.prds_dir)?
            .into_iter()
            .find(|path| !excluded.contains(&prd_name(path)));
        match next {
            Some(path) => self.load_into(store, &path),
            None => {
                store.update(|state| state.clear_queue())?;
                info!("prd queue empty");
                Ok(AdvanceOutcome::QueueEmpty)
            }
        }
    }

    /// Point the state at the named PRD in the queue directory.
    pub fn initialize_from_prd(&self, store: &mut StateStore, name: &str) -> Result<AdvanceOutcome> {
        let path = self.prds_dir.join(name);
        if !path.is_file() {
            return Err(anyhow!(
                "prd {name} not found in {}",
                self.prds_dir.display()
            ));
        }
        self.load_into(store, &path)
    }

    fn load_into(&self, store: &mut StateStore, path: &Path) -> Result<AdvanceOutcome> {
        let prd = load_prd(path)?;
        let name = prd_name(path);
        let story_ids = prd.story_ids();
        store.update(|state| state.reset_for_prd(&name, story_ids))?;
        let state = store.state();
        info!(prd = %name, stories = state.remaining_stories.len(), "prd loaded");
        Ok(AdvanceOutcome::Loaded {
            prd: name,
            first_story: state.current_story.clone(),
            story_count: state.remaining_stories.len(),
        })
    }

    fn incomplete_stories(
        &self,
        store: &StateStore,
        prd_path: &Path,
    ) -> Result<Vec<String>, String> {
        if !prd_path.is_file() {
            return Err(format!("prd file {} is missing", prd_path.display()));
        }
        let prd = load_prd(prd_path).map_err(|err| format!("{err:#}"))?;
        Ok(store.state().incomplete_stories(&prd.story_ids()))
    }
}
