//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - demo: run one scenario and print its journal
//! - list: list the available scenarios

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use tether::scenario::Scenario;

/// Tether - thread-affine dispatch runtime demos
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one scenario and print its journal
    Demo {
        /// Scenario name (see `tether list`)
        scenario: Scenario,

        /// Length of each blocking work chunk in milliseconds
        #[arg(long)]
        work_ms: Option<u64>,

        /// Sleep per position in the blocking scenario in milliseconds
        #[arg(long)]
        step_ms: Option<u64>,

        /// Positions walked by the blocking scenario
        #[arg(long)]
        steps: Option<u32>,

        /// Halt flag polling interval in milliseconds
        #[arg(long)]
        poll_ms: Option<u64>,

        /// Delay before the halt button is pressed in milliseconds
        #[arg(long)]
        halt_after_ms: Option<u64>,
    },

    /// List the available scenarios
    List,
}
