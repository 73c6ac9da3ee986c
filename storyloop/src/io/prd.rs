//! PRD documents and the PRD queue directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A requirements document: an ordered list of stories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prd {
    #[serde(default)]
    pub user_stories: Vec<Story>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
}

impl Story {
    /// Story known only by id (e.g. removed from its PRD after queueing).
    pub fn bare(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Self::default()
        }
    }
}

impl Prd {
    /// Story ids in document order.
    pub fn story_ids(&self) -> Vec<String> {
        self.user_stories.iter().map(|s| s.id.clone()).collect()
    }

    pub fn story(&self, id: &str) -> Option<&Story> {
        self.user_stories.iter().find(|s| s.id == id)
    }
}

pub fn load_prd(path: &Path) -> Result<Prd> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read prd {}", path.display()))?;
    let prd: Prd =
        serde_json::from_str(&contents).with_context(|| format!("parse prd {}", path.display()))?;
    debug!(path = %path.display(), stories = prd.user_stories.len(), "prd loaded");
    Ok(prd)
}

/// PRD files waiting in `prds_dir`, sorted by file name.
///
/// Only regular `*.json` files directly inside the directory count; the
/// archive subdirectory is never listed.
pub fn list_pending_prds(prds_dir: &Path) -> Result<Vec<PathBuf>> {
    if !prds_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut prds = Vec::new();
    for entry in
        fs::read_dir(prds_dir).with_context(|| format!("list prds {}", prds_dir.display()))?
    {
        let entry = entry.with_context(|| format!("list prds {}", prds_dir.display()))?;
        let path = entry.path();
        let is_json = path.extension().is_some_and(|ext| ext == "json");
        if is_json && path.is_file() {
            prds.push(path);
        }
    }
    prds.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(prds)
}

/// File name used to identify a PRD in state and history.
pub fn prd_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camel_case_stories() {
        let prd: Prd = serde_json::from_str(
            r#"{
                "title": "Auth",
                "userStories": [
                    {"id": "US-001", "title": "Login", "acceptanceCriteria": ["form renders"]},
                    {"id": "US-002"}
                ]
            }"#,
        )
        .expect("parse");
        assert_eq!(prd.story_ids(), vec!["US-001", "US-002"]);
        let login = prd.story("US-001").expect("story");
        assert_eq!(login.acceptance_criteria, vec!["form renders"]);
        assert_eq!(prd.story("US-002").map(|s| s.title.as_str()), Some(""));
    }

    #[test]
    fn missing_stories_key_is_empty_prd() {
        let prd: Prd = serde_json::from_str("{}").expect("parse");
        assert!(prd.story_ids().is_empty());
    }

    #[test]
    fn lists_json_files_sorted_without_archive() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path();
        fs::create_dir_all(dir.join("archive")).expect("archive");
        fs::write(dir.join("archive").join("000-old.json"), "{}").expect("write");
        fs::write(dir.join("010-b.json"), "{}").expect("write");
        fs::write(dir.join("002-a.json"), "{}").expect("write");
        fs::write(dir.join("notes.md"), "x").expect("write");

        let names: Vec<String> = list_pending_prds(dir)
            .expect("list")
            .iter()
            .map(|p| prd_name(p))
            .collect();
        assert_eq!(names, vec!["002-a.json", "010-b.json"]);
    }

    #[test]
    fn missing_dir_lists_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(list_pending_prds(&temp.path().join("nope")).expect("list").is_empty());
    }

    #[test]
    fn invalid_json_names_the_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("bad.json");
        fs::write(&path, "{ not json").expect("write");
        let err = load_prd(&path).expect_err("invalid");
        assert!(format!("{err:#}").contains("bad.json"));
    }
}
