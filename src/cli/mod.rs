//! CLI module for nightshift - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for running the cycle
//! loop, checking the baseline, and rebuilding run reports.

pub mod commands;

pub use commands::{Cli, Commands, RunArgs};
