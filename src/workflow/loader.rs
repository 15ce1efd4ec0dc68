//! Loader for workflow definitions
//!
//! Handles locating `*.wf.md` workflow documents, either by path or by name
//! in the configured workflows directory.

use glob::glob;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::constants::WORKFLOW_SUFFIX;
use crate::workflow::error::WorkflowError;
use crate::workflow::reader::WorkflowReader;
use crate::workflow::types::Workflow;

/// Load a workflow by path or name
pub fn load_workflow(target: &str, workflows_dir: &Path) -> Result<Workflow, WorkflowError> {
    let path = find_workflow_file(target, workflows_dir)?;
    debug!("Loading workflow from {}", path.display());
    WorkflowReader::load_from_file(&path)
}

/// Find a workflow file
///
/// Searches in the following order:
/// 1. `target` as a path
/// 2. `target` with the `.wf.md` suffix as a path
/// 3. both forms inside `workflows_dir`
pub fn find_workflow_file(target: &str, workflows_dir: &Path) -> Result<PathBuf, WorkflowError> {
    let with_suffix = if target.ends_with(WORKFLOW_SUFFIX) {
        target.to_string()
    } else {
        format!("{}{}", target, WORKFLOW_SUFFIX)
    };

    let candidates = [
        PathBuf::from(target),
        PathBuf::from(&with_suffix),
        workflows_dir.join(target),
        workflows_dir.join(&with_suffix),
    ];
    candidates
        .into_iter()
        .find(|path| path.is_file())
        .ok_or_else(|| {
            WorkflowError::NotFound(format!(
                "{} (searched the current directory and {})",
                target,
                workflows_dir.display()
            ))
        })
}

/// List all available workflows
///
/// Returns the sorted workflow names (without suffix) in `workflows_dir`.
pub fn list_workflows(workflows_dir: &Path) -> Result<Vec<String>, WorkflowError> {
    if !workflows_dir.is_dir() {
        return Ok(Vec::new());
    }

    let pattern = workflows_dir.join(format!("*{}", WORKFLOW_SUFFIX));
    let pattern = pattern.to_string_lossy();
    let paths = glob(&pattern).map_err(|e| WorkflowError::NotFound(e.to_string()))?;

    let mut workflows = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) => {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    workflows.push(name.trim_end_matches(WORKFLOW_SUFFIX).to_string());
                }
            }
            Err(e) => warn!("Skipping unreadable entry: {}", e),
        }
    }
    workflows.sort();
    Ok(workflows)
}
