//! Conventional commit messages for completed stories.

/// Build `<type>: <lowercased title> (<story id>)`.
///
/// The type comes from the id prefix: `BUG-` is `fix`, `REFACTOR-` is
/// `refactor`, `DOC-` is `docs`, anything else is `feat`.
pub fn commit_message(story_id: &str, title: &str) -> String {
    let kind = commit_type(story_id);
    let title = title.trim();
    if title.is_empty() {
        format!("{kind}: complete story ({story_id})")
    } else {
        format!("{kind}: {} ({story_id})", title.to_lowercase())
    }
}

fn commit_type(story_id: &str) -> &'static str {
    let upper = story_id.to_ascii_uppercase();
    if upper.starts_with("BUG") {
        "fix"
    } else if upper.starts_with("REFACTOR") {
        "refactor"
    } else if upper.starts_with("DOC") {
        "docs"
    } else {
        "feat"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_story_uses_feat() {
        assert_eq!(
            commit_message("US-001", "Add Login Form"),
            "feat: add login form (US-001)"
        );
    }

    #[test]
    fn prefix_selects_type() {
        assert_eq!(commit_message("BUG-3", "Crash"), "fix: crash (BUG-3)");
        assert_eq!(
            commit_message("REFACTOR-1", "Split module"),
            "refactor: split module (REFACTOR-1)"
        );
        assert_eq!(commit_message("DOC-2", "Usage"), "docs: usage (DOC-2)");
    }

    #[test]
    fn missing_title_still_names_story() {
        assert_eq!(
            commit_message("US-9", "  "),
            "feat: complete story (US-9)"
        );
    }
}
