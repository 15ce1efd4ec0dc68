//! Reader for workflow documents
//!
//! A document is Markdown with three parts:
//! - free text before the first section, used as description
//! - `# Workflow` with a ```` ```mermaid ```` flowchart defining the graph
//! - `# Prompts` with `## <Role> <id>` sections
//!
//! Flowchart lines are node declarations (`NAME["expr"]`, `NAME{expr}`,
//! `NAME[[expr]]`, `NAME@{ ... }`) or edges (`A --> B`, `A -->|LABEL| B`,
//! also chained). The kind of an activity is the name prefix before the
//! first `_`.

use lazy_static::lazy_static;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::agent::{Prompt, Role};
use crate::workflow::error::WorkflowError;
use crate::workflow::types::{Activity, ActivityKind, EdgeLabel, Workflow};

lazy_static! {
    static ref LABEL_ATTRIBUTE: Regex = Regex::new(r#"label:\s*"([^"]*)""#).unwrap();
}

const PARAMS_NODE: &str = "PARAMS";

/// First words of flowchart lines that only affect rendering
const HOUSEKEEPING: [&str; 8] = [
    "style",
    "classDef",
    "class",
    "linkStyle",
    "click",
    "subgraph",
    "end",
    "direction",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Workflow,
    Prompts,
    Other,
}

/// Prompt whose body is still being collected
struct PendingPrompt {
    key: String,
    role: Role,
    lines: Vec<String>,
}

pub struct WorkflowReader {
    workflow: Workflow,
    in_mermaid: bool,
    in_flowchart: bool,
}

impl WorkflowReader {
    /// Load a workflow document from disk
    ///
    /// Sub-workflows and `file:` variables are resolved relative to the
    /// directory of `path`.
    pub fn load_from_file(path: &Path) -> Result<Workflow, WorkflowError> {
        let content = fs::read_to_string(path).map_err(|e| WorkflowError::io(path, e))?;
        let directory = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let workflow = Self::parse(&content, path.to_path_buf(), directory)?;
        info!(
            "Loaded workflow {:?} from {} ({} activities, {} prompts)",
            workflow.name,
            path.display(),
            workflow.activities.len(),
            workflow.prompts.len()
        );
        Ok(workflow)
    }

    /// Load a workflow document held in memory
    pub fn load_from_str(content: &str) -> Result<Workflow, WorkflowError> {
        Self::parse(content, PathBuf::new(), PathBuf::from("."))
    }

    fn parse(content: &str, filepath: PathBuf, directory: PathBuf) -> Result<Workflow, WorkflowError> {
        let mut reader = WorkflowReader {
            workflow: Workflow {
                filepath,
                directory,
                ..Default::default()
            },
            in_mermaid: false,
            in_flowchart: false,
        };

        let mut section = Section::Preamble;
        let mut description: Vec<&str> = Vec::new();
        let mut pending: Option<PendingPrompt> = None;
        let mut prompt_fence = false;

        for (index, raw) in content.lines().enumerate() {
            let line_no = index + 1;
            let trimmed = raw.trim();

            if let Some(heading) = trimmed.strip_prefix("# ").filter(|_| !prompt_fence) {
                reader.flush_prompt(pending.take());
                section = reader.enter_section(section, heading.trim());
                reader.in_mermaid = false;
                reader.in_flowchart = false;
                continue;
            }

            match section {
                Section::Preamble => {
                    if !trimmed.is_empty() {
                        description.push(raw.trim_end());
                    }
                }
                Section::Workflow => reader.workflow_line(trimmed, line_no)?,
                Section::Prompts => {
                    if let Some(header) = trimmed.strip_prefix("## ").filter(|_| !prompt_fence) {
                        reader.flush_prompt(pending.take());
                        pending = Some(Self::prompt_header(header.trim(), line_no)?);
                        continue;
                    }
                    if trimmed.starts_with("```") {
                        prompt_fence = !prompt_fence;
                    }
                    if let Some(prompt) = pending.as_mut() {
                        prompt.lines.push(raw.to_string());
                    }
                }
                Section::Other => {}
            }
        }
        reader.flush_prompt(pending.take());

        reader.workflow.description = description.join("\n");
        reader.finish()
    }

    fn enter_section(&mut self, current: Section, heading: &str) -> Section {
        if heading.starts_with("Workflow") {
            Section::Workflow
        } else if heading.starts_with("Prompts") {
            Section::Prompts
        } else if current == Section::Preamble && self.workflow.name.is_empty() {
            self.workflow.name = heading.to_string();
            Section::Preamble
        } else {
            debug!("Skipping section {:?}", heading);
            Section::Other
        }
    }

    fn prompt_header(header: &str, line_no: usize) -> Result<PendingPrompt, WorkflowError> {
        let role_name = header.split_whitespace().next().unwrap_or("");
        let role = role_name
            .parse::<Role>()
            .map_err(|_| WorkflowError::InvalidRole {
                line: line_no,
                role: role_name.to_string(),
            })?;
        Ok(PendingPrompt {
            key: header.to_string(),
            role,
            lines: Vec::new(),
        })
    }

    fn flush_prompt(&mut self, pending: Option<PendingPrompt>) {
        if let Some(prompt) = pending {
            let content = prompt.lines.join("\n");
            if content.trim().is_empty() {
                debug!("Skipping empty prompt {:?}", prompt.key);
                return;
            }
            self.workflow
                .prompts
                .insert(prompt.key, Prompt::new(prompt.role, &content));
        }
    }

    fn workflow_line(&mut self, trimmed: &str, line_no: usize) -> Result<(), WorkflowError> {
        if trimmed.starts_with("```mermaid") {
            self.in_mermaid = true;
            self.in_flowchart = false;
        } else if trimmed.starts_with("```") {
            self.in_mermaid = false;
            self.in_flowchart = false;
        } else if self.in_mermaid && !self.in_flowchart {
            if trimmed.starts_with("flowchart") || trimmed.starts_with("graph") {
                self.in_flowchart = true;
            }
        } else if self.in_flowchart && !trimmed.is_empty() {
            self.flowchart_line(trimmed, line_no)?;
        }
        Ok(())
    }

    fn flowchart_line(&mut self, line: &str, line_no: usize) -> Result<(), WorkflowError> {
        if line.starts_with("%%") {
            return Ok(());
        }
        let first_word = line.split_whitespace().next().unwrap_or("");
        if HOUSEKEEPING.contains(&first_word) {
            return Ok(());
        }

        let segments = split_arrows(line);
        if segments.len() == 1 {
            self.declare_node(segments[0], line_no)?;
            return Ok(());
        }

        let mut nodes = Vec::with_capacity(segments.len());
        for (position, segment) in segments.iter().enumerate() {
            let (label, node) = split_edge_label(segment.trim());
            if position == 0 && label.is_some() {
                return Err(WorkflowError::InvalidEdge {
                    line: line_no,
                    text: line.to_string(),
                });
            }
            let name = self.declare_node(node, line_no)?;
            if name == PARAMS_NODE {
                return Err(WorkflowError::InvalidEdge {
                    line: line_no,
                    text: line.to_string(),
                });
            }
            nodes.push((label, name));
        }

        for pair in nodes.windows(2) {
            let (_, from) = &pair[0];
            let (label, to) = &pair[1];
            let label = label.unwrap_or("");
            let edge = EdgeLabel::parse(label).ok_or_else(|| WorkflowError::InvalidEdgeLabel {
                line: line_no,
                label: label.to_string(),
            })?;
            self.connect(from, to, edge);
        }
        Ok(())
    }

    fn connect(&mut self, from: &str, to: &str, edge: EdgeLabel) {
        if let Some(activity) = self.workflow.activities.get_mut(from) {
            let slot = match edge {
                EdgeLabel::Next => &mut activity.next,
                EdgeLabel::Other => &mut activity.other,
            };
            if let Some(previous) = slot.as_ref().filter(|previous| previous.as_str() != to) {
                warn!("Edge {:?} of {} rewired from {} to {}", edge, from, previous, to);
            }
            *slot = Some(to.to_string());
            debug!("Flow-Parsed: {} --{:?}--> {}", from, edge, to);
        }
    }

    /// Register a node and return its name
    fn declare_node(&mut self, text: &str, line_no: usize) -> Result<String, WorkflowError> {
        let text = text.trim();
        let name_len = text
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(text.len());
        let (name, shape) = text.split_at(name_len);
        if name.is_empty() {
            return Err(WorkflowError::MalformedLine {
                line: line_no,
                text: text.to_string(),
            });
        }
        let shape = shape.trim();

        if name.split('_').next() == Some(PARAMS_NODE) {
            let expression = node_expression(shape, None).ok_or_else(|| {
                WorkflowError::MalformedLine {
                    line: line_no,
                    text: text.to_string(),
                }
            })?;
            self.add_params(&expression);
            return Ok(PARAMS_NODE.to_string());
        }

        let kind = ActivityKind::from_name(name).ok_or_else(|| {
            WorkflowError::UnknownActivityKind {
                line: line_no,
                name: name.to_string(),
            }
        })?;
        let expression =
            node_expression(shape, Some(kind)).ok_or_else(|| WorkflowError::MalformedLine {
                line: line_no,
                text: text.to_string(),
            })?;

        match self.workflow.activities.get_mut(name) {
            Some(activity) => {
                if !expression.is_empty() {
                    activity.expression = expression;
                }
            }
            None => {
                debug!("Activity-Parsed: {} ({}) expr={:?}", name, kind, expression);
                self.workflow
                    .activities
                    .insert(name.to_string(), Activity::new(kind, name, &expression));
            }
        }
        Ok(name.to_string())
    }

    fn add_params(&mut self, expression: &str) {
        for param in expression.split(',') {
            let param = param.trim();
            if param.is_empty() {
                continue;
            }
            match param.split_once('=') {
                Some((key, value)) => {
                    self.workflow
                        .params
                        .insert(key.trim().to_string(), value.trim().to_string());
                }
                None => {
                    self.workflow.params.insert(param.to_string(), String::new());
                }
            }
        }
    }

    fn finish(mut self) -> Result<Workflow, WorkflowError> {
        let has = |name: &str| self.workflow.activities.contains_key(name);

        if !has("START") {
            return Err(WorkflowError::MissingStart);
        }
        let on_success = ["ON_SUCCESS", "ON_START"]
            .into_iter()
            .find(|name| has(name))
            .map(str::to_string);
        let on_failed = Some("ON_FAILED").filter(|name| has(name)).map(str::to_string);

        self.workflow.start = Some("START".to_string());
        self.workflow.on_success = on_success;
        self.workflow.on_failed = on_failed;
        Ok(self.workflow)
    }
}

/// Split a flowchart line at `-->` arrows outside of brackets and quotes
fn split_arrows(line: &str) -> Vec<&str> {
    let bytes = line.as_bytes();
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'"' => in_quotes = !in_quotes,
            b'[' | b'(' | b'{' if !in_quotes => depth += 1,
            b']' | b')' | b'}' if !in_quotes => depth = depth.saturating_sub(1),
            b'-' if !in_quotes && depth == 0 && bytes[i..].starts_with(b"-->") => {
                segments.push(&line[start..i]);
                i += 3;
                start = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    segments.push(&line[start..]);
    segments
}

/// Split `|LABEL| NODE` into its label and node text
fn split_edge_label(segment: &str) -> (Option<&str>, &str) {
    if let Some(rest) = segment.strip_prefix('|') {
        if let Some(end) = rest.find('|') {
            return (Some(rest[..end].trim()), rest[end + 1..].trim());
        }
    }
    (None, segment)
}

/// Index of the bracket closing the one at position 0
fn matching_close(text: &str) -> Option<usize> {
    let open = text.chars().next()?;
    let close = match open {
        '[' => ']',
        '(' => ')',
        '{' => '}',
        _ => return None,
    };
    let mut depth = 0usize;
    let mut in_quotes = false;
    for (index, c) in text.char_indices() {
        if c == '"' {
            in_quotes = !in_quotes;
        } else if !in_quotes && c == open {
            depth += 1;
        } else if !in_quotes && c == close {
            depth -= 1;
            if depth == 0 {
                return Some(index);
            }
        }
    }
    None
}

/// Expression carried by the shape part of a node declaration
///
/// Returns None for shape text that cannot be parsed.
fn node_expression(shape: &str, kind: Option<ActivityKind>) -> Option<String> {
    if shape.is_empty() {
        return Some(String::new());
    }

    if let Some(decoration) = shape.strip_prefix('@') {
        let label = LABEL_ATTRIBUTE
            .captures(decoration)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
        return Some(match kind {
            None => label,
            // only `Kind: expression` labels carry an expression
            Some(kind) => match strip_kind_label(&label, kind) {
                Some(expression) => expression.to_string(),
                None => String::new(),
            },
        });
    }

    let mut inner = shape;
    loop {
        if inner.len() >= 2 && inner.starts_with('"') && inner.ends_with('"') {
            inner = inner[1..inner.len() - 1].trim();
            break;
        }
        match matching_close(inner) {
            Some(end) if end == inner.len() - 1 => inner = inner[1..end].trim(),
            _ => break,
        }
    }
    if inner.len() == shape.len() {
        return None;
    }

    let expression = match kind {
        Some(kind) => strip_kind_label(inner, kind).unwrap_or(inner),
        None => inner,
    };
    Some(expression.to_string())
}

/// Remove a leading `Kind:` used for rendering only
fn strip_kind_label(text: &str, kind: ActivityKind) -> Option<&str> {
    let (prefix, rest) = text.split_once(':')?;
    if prefix.trim().eq_ignore_ascii_case(kind.label()) {
        Some(rest.trim())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIT_CHECK: &str = r#"
Checks that git is installed and the remote is reachable.

# Git check

The operator only watches.

# Workflow
```mermaid
flowchart TD
  %% parameters
  PARAMS@{ shape: doc, label: "repo=https://github.com, depth=1" }
  START@{ shape: f-circ, label: "start"} --> PROMPT_SYSTEM[Prompt: System]
  PROMPT_SYSTEM --> PROMPT_GIT["Prompt: User TestGit"]
  PROMPT_GIT --> EXECUTE_GIT["Execute: "]
  EXECUTE_GIT --> CHECK_GIT{"RESULT CONTAINS git version"}
  CHECK_GIT -->|TRUE| SUCCESS@{ shape: stadium }
  CHECK_GIT -->|no| PROMPT_GIT
  EXECUTE_GIT -->|FAILED| FAILED
  ON_FAILED --> ASSIGN_DIAG[Assign: 'failed'] --> FAILED
  style START stroke:#000,stroke-width:4px,fill:#80a0ff
```

# Prompts

## System

You are a shell expert.

## User TestGit

Check git with:

```bash
## not a header
git --version
```
"#;

    #[test]
    fn test_parse_document() {
        let workflow = WorkflowReader::load_from_str(GIT_CHECK).unwrap();

        assert_eq!(workflow.name, "Git check");
        assert!(workflow.description.starts_with("Checks that git"));
        assert!(workflow.description.contains("The operator only watches."));
        assert_eq!(workflow.params.get("repo").unwrap(), "https://github.com");
        assert_eq!(workflow.params.get("depth").unwrap(), "1");

        let check = workflow.activity("CHECK_GIT").unwrap();
        assert_eq!(check.kind, ActivityKind::Check);
        assert_eq!(check.expression, "RESULT CONTAINS git version");
        assert_eq!(check.next.as_deref(), Some("SUCCESS"));
        assert_eq!(check.other.as_deref(), Some("PROMPT_GIT"));

        assert_eq!(workflow.activity("PROMPT_SYSTEM").unwrap().expression, "System");
        assert_eq!(workflow.activity("PROMPT_GIT").unwrap().expression, "User TestGit");
        assert_eq!(workflow.activity("EXECUTE_GIT").unwrap().expression, "");
        assert_eq!(
            workflow.activity("EXECUTE_GIT").unwrap().other.as_deref(),
            Some("FAILED")
        );
        assert_eq!(workflow.activity("START").unwrap().expression, "");
        assert_eq!(workflow.activity("ASSIGN_DIAG").unwrap().expression, "'failed'");
        assert_eq!(
            workflow.activity("ASSIGN_DIAG").unwrap().next.as_deref(),
            Some("FAILED")
        );

        assert_eq!(workflow.start.as_deref(), Some("START"));
        assert_eq!(workflow.on_failed.as_deref(), Some("ON_FAILED"));
        assert_eq!(workflow.on_success, None);
        assert!(workflow.dangling_edges().is_empty());
    }

    #[test]
    fn test_prompts() {
        let workflow = WorkflowReader::load_from_str(GIT_CHECK).unwrap();

        let system = workflow.prompts.get("System").unwrap();
        assert_eq!(system.role, Role::System);
        assert_eq!(system.content, "You are a shell expert.");

        let git = workflow.prompts.get("User TestGit").unwrap();
        assert_eq!(git.role, Role::User);
        assert!(git.content.starts_with("Check git with:"));
        assert!(git.content.contains("## not a header"));
        assert!(git.content.ends_with("```"));
    }

    #[test]
    fn test_parse_is_idempotent() {
        let first = WorkflowReader::load_from_str(GIT_CHECK).unwrap();
        let second = WorkflowReader::load_from_str(GIT_CHECK).unwrap();
        assert_eq!(first.activities, second.activities);
        assert_eq!(first.params, second.params);
        assert_eq!(first.prompts, second.prompts);
    }

    #[test]
    fn test_forward_declaration_keeps_expression() {
        let doc = "# Workflow\n```mermaid\nflowchart TD\n  START --> SET_A\n  SET_A[\"a=1\"] --> SUCCESS\n  SET_A --> SUCCESS\n```\n";
        let workflow = WorkflowReader::load_from_str(doc).unwrap();
        let set = workflow.activity("SET_A").unwrap();
        assert_eq!(set.expression, "a=1");
        assert_eq!(set.next.as_deref(), Some("SUCCESS"));
    }

    #[test]
    fn test_unknown_kind() {
        let doc = "# Workflow\n```mermaid\nflowchart TD\n  START --> LOOP_A\n```\n";
        match WorkflowReader::load_from_str(doc) {
            Err(WorkflowError::UnknownActivityKind { line, name }) => {
                assert_eq!(line, 4);
                assert_eq!(name, "LOOP_A");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_invalid_edge_label() {
        let doc = "# Workflow\n```mermaid\nflowchart TD\n  START -->|MAYBE| SUCCESS\n```\n";
        assert!(matches!(
            WorkflowReader::load_from_str(doc),
            Err(WorkflowError::InvalidEdgeLabel { line: 4, .. })
        ));
    }

    #[test]
    fn test_invalid_role() {
        let doc = "# Workflow\n```mermaid\nflowchart TD\n  START --> SUCCESS\n```\n# Prompts\n## Critic Review\ntext\n";
        assert!(matches!(
            WorkflowReader::load_from_str(doc),
            Err(WorkflowError::InvalidRole { line: 7, .. })
        ));
    }

    #[test]
    fn test_missing_start() {
        let doc = "# Workflow\n```mermaid\nflowchart TD\n  SET_A[\"a=1\"] --> SUCCESS\n```\n";
        assert!(matches!(
            WorkflowReader::load_from_str(doc),
            Err(WorkflowError::MissingStart)
        ));
    }

    #[test]
    fn test_params_in_edge_is_rejected() {
        let doc = "# Workflow\n```mermaid\nflowchart TD\n  PARAMS --> START\n```\n";
        assert!(matches!(
            WorkflowReader::load_from_str(doc),
            Err(WorkflowError::InvalidEdge { .. })
        ));
    }

    #[test]
    fn test_arrow_inside_expression() {
        let doc = "# Workflow\n```mermaid\nflowchart TD\n  START --> EXECUTE_A[\"echo a --> b\"] --> SUCCESS\n```\n";
        let workflow = WorkflowReader::load_from_str(doc).unwrap();
        assert_eq!(workflow.activity("EXECUTE_A").unwrap().expression, "echo a --> b");
    }

    #[test]
    fn test_label_prefix_only_for_kind() {
        let doc = "# Workflow\n```mermaid\nflowchart TD\n  START --> SET_F[\"file:out.md=RESULT\"] --> ASSIGN_U[\"https://example.com\"] --> SUCCESS\n```\n";
        let workflow = WorkflowReader::load_from_str(doc).unwrap();
        assert_eq!(workflow.activity("SET_F").unwrap().expression, "file:out.md=RESULT");
        assert_eq!(
            workflow.activity("ASSIGN_U").unwrap().expression,
            "https://example.com"
        );
    }

    #[test]
    fn test_call_shape_and_on_start_handler() {
        let doc = "# Workflow\n```mermaid\nflowchart TD\n  START --> CALL_SUB[[sub.wf.md]]\n  CALL_SUB --> SUCCESS\n  CALL_SUB -->|ERROR| FAILED\n  ON_START --> SUCCESS\n```\n";
        let workflow = WorkflowReader::load_from_str(doc).unwrap();
        let call = workflow.activity("CALL_SUB").unwrap();
        assert_eq!(call.expression, "sub.wf.md");
        assert_eq!(call.other.as_deref(), Some("FAILED"));
        assert_eq!(workflow.on_success.as_deref(), Some("ON_START"));
    }

    #[test]
    fn test_load_from_file_sets_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.wf.md");
        fs::write(&path, "# Workflow\n```mermaid\nflowchart TD\n  START --> SUCCESS\n```\n").unwrap();

        let workflow = WorkflowReader::load_from_file(&path).unwrap();
        assert_eq!(workflow.directory, dir.path());
        assert_eq!(workflow.filepath, path);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            WorkflowReader::load_from_file(Path::new("/nonexistent/x.wf.md")),
            Err(WorkflowError::Io { .. })
        ));
    }
}
