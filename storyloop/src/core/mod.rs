//! Deterministic, pure logic shared by the story loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod commit;
pub mod failure;
pub mod phase;
pub mod signal;
pub mod state;
pub mod story_id;
pub mod types;
