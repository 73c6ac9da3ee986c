//! Side-effecting adapters: filesystem, child processes, git, the agent.

pub mod agent;
pub mod atomic;
pub mod config;
pub mod git;
pub mod history;
pub mod paths;
pub mod phase_store;
pub mod prd;
pub mod process;
pub mod prompt;
pub mod state_store;
pub mod test_runner;
