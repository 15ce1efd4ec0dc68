//! codementor - workflow runner
//!
//! Loads `.env`, sets up logging and dispatches the subcommands to the
//! workflow engine.

mod cli;

use clap::Parser;
use codementor::config::EngineConfig;
use codementor::workflow::cli::{
    handle_check_command, handle_list_command, handle_render_command, handle_run_command,
    RunOptions,
};
use codementor::workflow::Status;
use crossterm::{
    cursor, execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use std::io;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};

/// Main entry point for the application
#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables from .env file
    let _ = dotenvy::dotenv();
    init_logging();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            let _ = execute!(
                io::stderr(),
                SetForegroundColor(Color::Red),
                Print(format!("Error: {:#}", e)),
                ResetColor,
                cursor::MoveToNextLine(1),
            );
            ExitCode::FAILURE
        }
    }
}

/// Log to stderr, level from LOGLEVEL (default info)
fn init_logging() {
    let level = std::env::var("LOGLEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_new(level.to_lowercase()).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = EngineConfig::from_env()?;

    match cli.command {
        Commands::Run {
            target,
            parameters,
            history_dir,
            max_hits,
        } => {
            let options = RunOptions {
                target,
                parameters,
                history_dir,
                max_hits,
            };
            let status = handle_run_command(&config, &options).await?;
            Ok(match status {
                Status::Failed => ExitCode::FAILURE,
                _ => ExitCode::SUCCESS,
            })
        }
        Commands::Check { file } => {
            handle_check_command(&file)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Render { file } => {
            handle_render_command(&file)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::List => {
            handle_list_command(&config)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
