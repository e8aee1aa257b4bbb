//! CLI command definitions
//!
//! Defines the clap commands for the stepwise CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run YAML test scenarios
    Run {
        /// Scenario files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print commands and captured output of every step
        #[arg(long, short)]
        verbose: bool,

        /// Print reports as JSON instead of the summary
        #[arg(long)]
        json: bool,

        /// Component under test; scenarios requiring another one are skipped
        #[arg(long)]
        component: Option<String>,

        /// Maximum number of parallel scenarios running at once
        #[arg(long)]
        max_parallel: Option<usize>,
    },

    /// Parse scenarios and build their steps without running anything
    Check {
        /// Scenario files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Print generated namespace names
    Namespace {
        /// Test-case label the names are derived from
        label: String,

        /// How many names to generate
        #[arg(long, short = 'n', default_value_t = 1)]
        count: usize,
    },
}
