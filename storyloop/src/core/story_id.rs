//! Story id handling for file names.

/// Strip path separators and parent-directory sequences from a story id.
///
/// The result is safe to embed in a single file name. It may be empty, in
/// which case callers must refuse to build a path from it.
pub fn sanitize_story_id(story_id: &str) -> String {
    let mut cleaned: String = story_id
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | '\0'))
        .collect();
    while cleaned.contains("..") {
        cleaned = cleaned.replace("..", "");
    }
    cleaned.trim().to_string()
}
