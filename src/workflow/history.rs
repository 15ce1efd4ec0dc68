//! Run history and its Markdown snapshot
//!
//! Every visited activity adds a record. After each step the whole history
//! is written to `<output dir>/<workflow stem>.wfh.md`, so an interrupted run
//! still leaves a readable trace.

use chrono::{DateTime, Local};
use indexmap::IndexMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::constants::{HISTORY_SUFFIX, WORKFLOW_SUFFIX};
use crate::text::trunc_middle;
use crate::workflow::types::{Status, Workflow};
use crate::workflow::writer::render_history;

/// One executed activity
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub caption: String,
    pub status: Status,
    pub result: String,
    pub timestamp: DateTime<Local>,
}

/// Records of a run, shared by the workflow and its sub-workflows
#[derive(Debug)]
pub struct History {
    output_dir: Option<PathBuf>,
    max_record_length: usize,
    records: Vec<HistoryRecord>,
}

impl History {
    /// Without `output_dir` records are kept in memory only
    pub fn new(output_dir: Option<PathBuf>, max_record_length: usize) -> Self {
        Self {
            output_dir,
            max_record_length,
            records: Vec::new(),
        }
    }

    /// Append a record and return its index
    pub fn add_record(&mut self, caption: &str, status: Status, result: &str) -> usize {
        self.records.push(HistoryRecord {
            caption: caption.to_string(),
            status,
            result: trunc_middle(result, self.max_record_length),
            timestamp: Local::now(),
        });
        self.records.len() - 1
    }

    /// Replace the result of an earlier record
    pub fn update_result(&mut self, index: usize, result: &str) {
        let max = self.max_record_length;
        match self.records.get_mut(index) {
            Some(record) => record.result = trunc_middle(result, max),
            None => warn!("No history record {}", index),
        }
    }

    pub fn records(&self) -> &[HistoryRecord] {
        &self.records
    }

    /// Path of the snapshot file for `workflow`
    pub fn snapshot_path(&self, workflow: &Workflow) -> Option<PathBuf> {
        let dir = self.output_dir.as_ref()?;
        Some(dir.join(format!("{}{}", workflow_stem(&workflow.filepath), HISTORY_SUFFIX)))
    }

    /// Write the snapshot; failures are logged and never stop the run
    pub fn save(
        &self,
        workflow: &Workflow,
        current: Option<&str>,
        variables: &IndexMap<String, String>,
    ) {
        let Some(path) = self.snapshot_path(workflow) else {
            return;
        };
        let text = match render_history(workflow, current, variables, &self.records) {
            Ok(text) => text,
            Err(e) => {
                warn!("Cannot render history: {}", e);
                return;
            }
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!("Cannot create {}: {}", parent.display(), e);
                return;
            }
        }
        match fs::write(&path, text) {
            Ok(()) => debug!("History written to {}", path.display()),
            Err(e) => warn!("Cannot write history {}: {}", path.display(), e),
        }
    }
}

/// File name without the workflow suffix
fn workflow_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if let Some(stem) = name.strip_suffix(WORKFLOW_SUFFIX) {
        return stem.to_string();
    }
    match path.file_stem() {
        Some(stem) if !stem.is_empty() => stem.to_string_lossy().into_owned(),
        _ => "workflow".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::reader::WorkflowReader;

    #[test]
    fn test_records_are_truncated() {
        let mut history = History::new(None, 20);
        let index = history.add_record("Execute", Status::Doing, &"x".repeat(100));
        assert_eq!(index, 0);
        assert!(history.records()[0].result.contains("...(truncated)..."));

        history.update_result(0, "short");
        assert_eq!(history.records()[0].result, "short");
        history.update_result(5, "ignored");
        assert_eq!(history.records().len(), 1);
    }

    #[test]
    fn test_snapshot_path() {
        let history = History::new(Some(PathBuf::from("out")), 100);
        let workflow = Workflow {
            filepath: PathBuf::from("flows/review.wf.md"),
            ..Default::default()
        };
        assert_eq!(
            history.snapshot_path(&workflow),
            Some(PathBuf::from("out/review.wfh.md"))
        );

        let unnamed = Workflow::default();
        assert_eq!(
            history.snapshot_path(&unnamed),
            Some(PathBuf::from("out/workflow.wfh.md"))
        );
        assert_eq!(History::new(None, 100).snapshot_path(&unnamed), None);
    }

    #[test]
    fn test_save_writes_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("history");
        let mut workflow = WorkflowReader::load_from_str(
            "# Hello\n# Workflow\n```mermaid\nflowchart TD\n  START --> SUCCESS\n```\n",
        )
        .unwrap();
        workflow.filepath = PathBuf::from("hello.wf.md");

        let mut history = History::new(Some(out.clone()), 1000);
        history.add_record("Start", Status::Doing, "");
        history.add_record("SUCCESS", Status::Success, "done");
        history.save(&workflow, Some("SUCCESS"), &IndexMap::new());

        let text = fs::read_to_string(out.join("hello.wfh.md")).unwrap();
        assert!(text.contains("## 2. SUCCESS  => SUCCESS"));
        assert!(text.contains("done"));
        assert!(text.contains("style SUCCESS"));
    }
}
