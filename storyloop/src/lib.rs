//! Test-first story loop.
//!
//! Works through a backlog of PRDs one story at a time: a code agent writes
//! the story's tests, then the implementation, and the tests decide whether
//! the story is done. Every committed story's tests join a regression suite
//! that must keep passing. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (queue rules, phases, output parsing).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, git, process execution).
//!   Collaborators sit behind traits to enable scripted doubles in tests.
//!
//! Orchestration modules ([`controller`], [`regression`], [`archive`],
//! [`migrate`], [`looping`]) coordinate core logic with I/O to implement the
//! CLI commands.

pub mod archive;
pub mod controller;
pub mod core;
pub mod exit_codes;
pub mod init;
pub mod io;
pub mod logging;
pub mod looping;
pub mod migrate;
pub mod regression;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
