//! Command-line interface for narps-runner.
//!
//! Provides commands to run a team pipeline, check its outputs and list the
//! known teams.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands, RunArgs, TeamsArgs};
