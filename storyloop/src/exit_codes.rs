//! Stable exit codes for storyloop CLI commands.

/// Command succeeded, or `run` drained the backlog.
pub const OK: i32 = 0;
/// Command failed due to invalid layout/config/state or other errors.
pub const INVALID: i32 = 1;
/// `run` stopped on a story that needs human intervention.
pub const BLOCKED: i32 = 3;
/// `run` stopped because the current PRD still has unfinished stories.
pub const HELD: i32 = 4;
