//! CLI command definitions
//!
//! Defines the clap commands for the harness CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// List the built-in scenarios
    #[command(alias = "ls")]
    List,

    /// Run built-in scenarios
    Run {
        /// Only run scenarios whose name contains this text
        filter: Option<String>,

        /// Print results as JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Run a scenario described in a YAML file
    RunFile {
        /// Path to the YAML scenario file
        path: PathBuf,

        /// Print the result as JSON instead of text
        #[arg(long)]
        json: bool,
    },
}
