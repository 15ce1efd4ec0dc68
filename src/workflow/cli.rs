//! CLI integration for the workflow system
//!
//! Provides the handlers behind the `run`, `check`, `render` and `list`
//! subcommands.

use anyhow::{bail, Context as _};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::agent::{Agent, ConsoleAgent, ConsoleInput};
use crate::commands::create_executor;
use crate::config::EngineConfig;
use crate::constants::{
    FORMAT_BOLD, FORMAT_GRAY, FORMAT_GREEN, FORMAT_RED, FORMAT_RESET, FORMAT_YELLOW,
};
use crate::workflow::context::{ConsoleOperator, Context};
use crate::workflow::history::History;
use crate::workflow::interpreter::Interpreter;
use crate::workflow::loader::{find_workflow_file, list_workflows, load_workflow};
use crate::workflow::reader::WorkflowReader;
use crate::workflow::types::Status;
use crate::workflow::writer::write_definition;

/// Options of the `run` subcommand
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub target: String,
    pub parameters: Vec<String>,
    pub history_dir: Option<PathBuf>,
    pub max_hits: Option<u32>,
}

/// Run a workflow and print its outcome
///
/// Returns the final status; the caller decides on the exit code.
pub async fn handle_run_command(
    config: &EngineConfig,
    options: &RunOptions,
) -> anyhow::Result<Status> {
    let mut workflow = load_workflow(&options.target, &config.workflows_dir)?;
    let parameters = parse_parameters(&options.parameters)?;

    let console = ConsoleInput::stdin();
    let agent = ConsoleAgent::with_console(console.clone());
    println!(
        "{}Running workflow: {}{} (from file {}) using {}",
        FORMAT_BOLD,
        workflow.name,
        FORMAT_RESET,
        workflow.filepath.display(),
        agent.model_name()
    );
    if !parameters.is_empty() {
        println!("with parameters:");
        for (key, value) in &parameters {
            println!("  - {}={}", key, value);
        }
    }
    workflow.params.extend(parameters);

    let executor = create_executor(config)
        .await
        .context("Failed to start the command executor")?;

    let max_hits = options.max_hits.unwrap_or(config.max_hits);
    let output_dir = options
        .history_dir
        .clone()
        .or_else(|| config.output_dir.clone());
    let mut history = History::new(output_dir, config.history_max_record_length);
    let mut ctx = Context::new(Arc::new(workflow))
        .with_agent(Box::new(agent))
        .with_executor(executor)
        .with_operator(Box::new(ConsoleOperator::new(console)));

    let (status, result) = Interpreter::new(max_hits).run(&mut ctx, &mut history).await;

    if let Some(mut executor) = ctx.executor.take() {
        executor.close().await;
    }
    if let Some(agent) = ctx.agent.as_ref() {
        let usage = agent.usage();
        info!(
            "Agent usage: {} iterations, {:.1}s, {} tokens",
            usage.total_iterations, usage.total_duration_sec, usage.total_tokens
        );
    }
    if let Some(path) = history.snapshot_path(&ctx.workflow) {
        println!("{}History: {}{}", FORMAT_GRAY, path.display(), FORMAT_RESET);
    }

    let color = match status {
        Status::Success => FORMAT_GREEN,
        Status::Failed => FORMAT_RED,
        _ => FORMAT_YELLOW,
    };
    println!("{}{}{}", color, status, FORMAT_RESET);
    println!("{}", result);
    Ok(status)
}

/// Parse a workflow and print its graph
pub fn handle_check_command(file: &Path) -> anyhow::Result<()> {
    let workflow = WorkflowReader::load_from_file(file)?;

    println!("{}{}{}", FORMAT_BOLD, workflow.name, FORMAT_RESET);
    if !workflow.description.is_empty() {
        println!("{}", workflow.description);
    }
    if !workflow.params.is_empty() {
        println!("\nParameters:");
        for (key, value) in &workflow.params {
            println!("  - {}={}", key, value);
        }
    }

    println!("\nActivities:");
    for activity in workflow.activities.values() {
        println!(
            "  {:<24} {:<8} {}",
            activity.name,
            activity.kind.as_str(),
            activity.expression
        );
        if let Some(next) = &activity.next {
            println!("  {}    --> {}{}", FORMAT_GRAY, next, FORMAT_RESET);
        }
        if let Some(other) = &activity.other {
            println!("  {}    -x> {}{}", FORMAT_GRAY, other, FORMAT_RESET);
        }
    }
    for handler in [&workflow.on_success, &workflow.on_failed].into_iter().flatten() {
        println!("\nEvent handler: {}", handler);
    }

    if !workflow.prompts.is_empty() {
        println!("\nPrompts:");
        for (id, prompt) in &workflow.prompts {
            println!("  - {} ({} chars)", id, prompt.content.len());
        }
    }

    let dangling = workflow.dangling_edges();
    for (from, to) in &dangling {
        warn!("Edge {} --> {} points to an undefined activity", from, to);
    }
    if !dangling.is_empty() {
        bail!("{} edge(s) point to undefined activities", dangling.len());
    }
    Ok(())
}

/// Print the workflow re-written by the writer
pub fn handle_render_command(file: &Path) -> anyhow::Result<()> {
    let workflow = WorkflowReader::load_from_file(file)?;
    print!("{}", write_definition(&workflow));
    Ok(())
}

/// List all available workflows
pub fn handle_list_command(config: &EngineConfig) -> anyhow::Result<()> {
    let workflows = list_workflows(&config.workflows_dir)?;

    if workflows.is_empty() {
        println!(
            "No workflows found. Create one in {}",
            config.workflows_dir.display()
        );
        return Ok(());
    }

    println!("Available workflows:");
    for name in workflows {
        let path = find_workflow_file(&name, &config.workflows_dir)?;
        match WorkflowReader::load_from_file(&path) {
            Ok(workflow) => println!("  - {:<20} {}", name, workflow.name),
            Err(e) => println!("  - {:<20} {}({}){}", name, FORMAT_RED, e, FORMAT_RESET),
        }
    }

    println!("\nRun with: codementor run <name>");
    Ok(())
}

/// Parse parameters from a list of key=value strings
pub fn parse_parameters(values: &[String]) -> anyhow::Result<IndexMap<String, String>> {
    let mut parameters = IndexMap::new();
    for value in values {
        match value.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                parameters.insert(key.trim().to_string(), value.to_string());
            }
            _ => bail!("Invalid parameter format: {}. Use key=value", value),
        }
    }
    Ok(parameters)
}
