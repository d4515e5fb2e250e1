//! CLI module for tether - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for running and listing
//! the demo scenarios.

pub mod commands;

pub use commands::Cli;
