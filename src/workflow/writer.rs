//! Writer for workflow documents and history snapshots
//!
//! The definition written here reads back into the same graph. History
//! snapshots reuse the flowchart, highlight the current activity and append
//! variables and the history records; they are rendered with handlebars.

use handlebars::Handlebars;
use indexmap::IndexMap;
use serde_json::json;
use std::collections::HashSet;
use std::fmt::Write as _;

use crate::workflow::error::WorkflowError;
use crate::workflow::history::HistoryRecord;
use crate::workflow::types::{Activity, ActivityKind, Workflow};

/// Style applied to the current activity in snapshots
const CURRENT_STYLE: &str = "stroke:#000,stroke-width:4px,fill:#80a0ff";

const HISTORY_TEMPLATE: &str = r#"# {{name}}

- filepath={{filepath}}

{{flowchart}}
## Variables:  
{{#each variables}}{{#if multiline}}- **{{key}}**:  
{{value}}  
{{else}}- **{{key}}**={{value}}  
{{/if}}{{/each}}

# History

{{#each records}}## {{number}}. {{caption}}  => {{status}}
<!-- ts={{timestamp}} -->
{{#if result}}{{result}}

{{else}}
{{/if}}{{/each}}"#;

/// Serialize a workflow definition
pub fn write_definition(workflow: &Workflow) -> String {
    let mut out = String::new();
    if !workflow.name.is_empty() {
        let _ = writeln!(out, "# {}\n", workflow.name);
    }
    if !workflow.description.is_empty() {
        let _ = writeln!(out, "{}\n", workflow.description);
    }
    out.push_str(&flowchart(workflow, None));
    out.push('\n');

    out.push_str("# Prompts\n\n");
    for (key, prompt) in &workflow.prompts {
        let _ = writeln!(out, "## {}\n\n{}\n", key, prompt.content);
    }
    out
}

/// Render a history snapshot
pub fn render_history(
    workflow: &Workflow,
    current: Option<&str>,
    variables: &IndexMap<String, String>,
    records: &[HistoryRecord],
) -> Result<String, WorkflowError> {
    let mut handlebars = Handlebars::new();
    handlebars.register_escape_fn(handlebars::no_escape);

    let variables: Vec<_> = variables
        .iter()
        .map(|(key, value)| {
            json!({
                "key": key,
                "value": value,
                "multiline": value.contains('\n'),
            })
        })
        .collect();
    let records: Vec<_> = records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            json!({
                "number": index + 1,
                "caption": record.caption,
                "status": record.status.as_str(),
                "timestamp": record.timestamp.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
                "result": record.result,
            })
        })
        .collect();

    let data = json!({
        "name": workflow.name,
        "filepath": workflow.filepath.display().to_string(),
        "flowchart": flowchart(workflow, current),
        "variables": variables,
        "records": records,
    });
    Ok(handlebars.render_template(HISTORY_TEMPLATE, &data)?)
}

/// `# Workflow` section with the mermaid flowchart
pub fn flowchart(workflow: &Workflow, current: Option<&str>) -> String {
    let mut out = String::from("# Workflow\n```mermaid\nflowchart TD\n");

    if !workflow.params.is_empty() {
        let params: Vec<String> = workflow
            .params
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        let _ = writeln!(
            out,
            "  PARAMS@{{ shape: doc, label: \"{}\" }}",
            params.join(", ")
        );
    }

    let mut visited = HashSet::new();
    if let Some(start) = &workflow.start {
        write_activity(&mut out, workflow, start, &mut visited);
    }
    for handler in [&workflow.on_success, &workflow.on_failed].into_iter().flatten() {
        if !visited.contains(handler.as_str()) {
            let _ = writeln!(out, "\n  %% Event-handler: {}", handler);
            write_activity(&mut out, workflow, handler, &mut visited);
        }
    }
    let unreachable: Vec<&String> = workflow
        .activities
        .keys()
        .filter(|name| !visited.contains(name.as_str()))
        .collect();
    for name in unreachable {
        write_activity(&mut out, workflow, name, &mut visited);
    }

    if let Some(current) = current {
        let _ = writeln!(out, "\n  style {} {}", current, CURRENT_STYLE);
    }
    out.push_str("```\n");
    out
}

fn write_activity<'a>(
    out: &mut String,
    workflow: &'a Workflow,
    name: &str,
    visited: &mut HashSet<&'a str>,
) {
    let Some(activity) = workflow.activity(name) else {
        return;
    };
    if !visited.insert(activity.name.as_str()) {
        return;
    }
    let _ = writeln!(out, "  {}{}", activity.name, node_shape(activity));

    if let Some(next) = &activity.next {
        let label = match activity.kind {
            ActivityKind::Check => "|TRUE| ",
            _ => "",
        };
        let _ = writeln!(out, "  {} --> {}{}", activity.name, label, next);
        write_activity(out, workflow, next, visited);
    }
    if let Some(other) = &activity.other {
        let label = match activity.kind {
            ActivityKind::Check => "|FALSE| ",
            _ => "|FAILED| ",
        };
        let _ = writeln!(out, "  {} --> {}{}", activity.name, label, other);
        write_activity(out, workflow, other, visited);
    }
}

/// Shape part of a node declaration
fn node_shape(activity: &Activity) -> String {
    let expression = activity.expression.as_str();
    let label = activity.kind.label();

    match activity.kind {
        ActivityKind::Start if expression.is_empty() => {
            "@{ shape: f-circ, label: \"start\" }".to_string()
        }
        ActivityKind::Success | ActivityKind::Failed | ActivityKind::On
            if expression.is_empty() =>
        {
            "@{ shape: stadium }".to_string()
        }
        ActivityKind::Success | ActivityKind::Failed | ActivityKind::On => {
            format!("([\"{}: {}\"])", label, expression)
        }
        ActivityKind::Ask if expression.is_empty() => "@{ shape: manual-input }".to_string(),
        ActivityKind::Ask => format!(
            "@{{ shape: manual-input, label: \"{}: {}\" }}",
            label, expression
        ),
        ActivityKind::Check => format!("{{\"{}\"}}", expression),
        ActivityKind::Call if expression.is_empty() => "@{ shape: subroutine }".to_string(),
        ActivityKind::Call => format!("[[\"{}\"]]", expression),
        _ => format!("[\"{}: {}\"]", label, expression),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::reader::WorkflowReader;
    use crate::workflow::types::Status;
    use chrono::Local;

    const DOCUMENT: &str = r#"# Review

Reviews a repository.

# Workflow
```mermaid
flowchart TD
  PARAMS@{ shape: doc, label: "repo=https://github.com, branch=main" }
  START --> SET_DIR["dir=work"] --> PROMPT_SYSTEM[Prompt: System]
  PROMPT_SYSTEM --> PROMPT_CLONE[Prompt: User Clone] --> EXECUTE_CLONE
  EXECUTE_CLONE --> CHECK_OK{"RESULT CONTAINS done"}
  EXECUTE_CLONE -->|FAILED| FAILED
  CHECK_OK -->|TRUE| CALL_GRADE[[grade.wf.md]] --> ASK_OPERATOR --> SUCCESS
  CHECK_OK -->|FALSE| PROMPT_CLONE
  CALL_GRADE -->|FAILED| FAILED
  ON_FAILED --> ASSIGN_SORRY["'sorry'"] --> FAILED
```

# Prompts

## System

You review code.

## User Clone

Clone {{repo}} at {{branch}}.
"#;

    #[test]
    fn test_definition_round_trip() {
        let first = WorkflowReader::load_from_str(DOCUMENT).unwrap();
        let written = write_definition(&first);
        let reread = WorkflowReader::load_from_str(&written).unwrap();

        assert_eq!(reread.name, first.name);
        assert_eq!(reread.description, first.description);
        assert_eq!(reread.params, first.params);
        assert_eq!(reread.prompts, first.prompts);
        assert_eq!(reread.activities.len(), first.activities.len());
        for (name, activity) in &first.activities {
            assert_eq!(reread.activities.get(name), Some(activity), "{}", name);
        }
        assert_eq!(reread.on_failed, first.on_failed);
    }

    #[test]
    fn test_edge_labels_written() {
        let workflow = WorkflowReader::load_from_str(DOCUMENT).unwrap();
        let chart = flowchart(&workflow, None);

        assert!(chart.contains("  CHECK_OK --> |TRUE| CALL_GRADE"));
        assert!(chart.contains("  CHECK_OK --> |FALSE| PROMPT_CLONE"));
        assert!(chart.contains("  CALL_GRADE --> |FAILED| FAILED"));
        assert!(chart.contains("%% Event-handler: ON_FAILED"));
        assert!(chart.contains("  CALL_GRADE[[\"grade.wf.md\"]]"));
        assert!(chart.starts_with("# Workflow\n```mermaid\nflowchart TD\n"));
    }

    #[test]
    fn test_history_snapshot() {
        let workflow = WorkflowReader::load_from_str(DOCUMENT).unwrap();
        let mut variables = IndexMap::new();
        variables.insert("repo".to_string(), "https://github.com".to_string());
        variables.insert("log".to_string(), "line 1\nline 2".to_string());
        let records = vec![
            HistoryRecord {
                caption: "Start".to_string(),
                status: Status::Doing,
                result: String::new(),
                timestamp: Local::now(),
            },
            HistoryRecord {
                caption: "Set: dir=work".to_string(),
                status: Status::Doing,
                result: "<b>kept</b>".to_string(),
                timestamp: Local::now(),
            },
        ];

        let text = render_history(&workflow, Some("SET_DIR"), &variables, &records).unwrap();
        assert!(text.starts_with("# Review\n"));
        assert!(text.contains("- filepath="));
        assert!(text.contains("style SET_DIR stroke:#000,stroke-width:4px,fill:#80a0ff"));
        assert!(text.contains("- **repo**=https://github.com"));
        assert!(text.contains("- **log**:  \nline 1\nline 2"));
        assert!(text.contains("## 1. Start  => DOING"));
        assert!(text.contains("## 2. Set: dir=work  => DOING"));
        assert!(text.contains("<!-- ts="));
        assert!(text.contains("<b>kept</b>"));

        // snapshots can be read back as definitions
        let reread = WorkflowReader::load_from_str(&text).unwrap();
        assert_eq!(reread.activities.len(), workflow.activities.len());
    }
}
