//! Command-line interface for data-tasks.
//!
//! Provides commands for listing tasks, resolving images, provisioning
//! sandboxes, running the agent driver, and running full attempts.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
