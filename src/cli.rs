//! Command-line interface definition and argument parsing
//!
//! This module uses clap to define and parse command-line arguments.

use clap::{Parser, Subcommand};
use codementor::constants::HELP_TEMPLATE;
use std::path::PathBuf;

/// Command-line arguments for codementor
#[derive(Parser, Debug)]
#[command(
    name = "codementor",
    about = "Run Markdown workflows that mix agent prompts with shell commands",
    version,
    author,
    after_long_help = HELP_TEMPLATE
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands for codementor
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a workflow given by path or by name in WORKFLOWS_DIR
    Run {
        /// Workflow file or name
        target: String,

        /// Parameters for the workflow in key=value format
        #[arg(long = "param", short = 'p')]
        parameters: Vec<String>,

        /// Directory for the history snapshot (defaults to OUTPUT_DIR)
        #[arg(long)]
        history_dir: Option<PathBuf>,

        /// How often a single activity may run (defaults to MAX_HITS)
        #[arg(long)]
        max_hits: Option<u32>,
    },

    /// Parse a workflow and print its activities, edges and prompts
    Check {
        /// Workflow file
        file: PathBuf,
    },

    /// Print the workflow re-written in canonical form
    Render {
        /// Workflow file
        file: PathBuf,
    },

    /// List workflows in WORKFLOWS_DIR
    List,
}
