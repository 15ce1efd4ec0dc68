//! Type definitions for the workflow graph
//!
//! A [`Workflow`] owns all of its activities in one map keyed by name; edges
//! refer to other activities by that name, so retry loops need no shared
//! ownership.

use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::agent::Prompt;

/// Kind of an activity, taken from the name prefix before the first `_`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActivityKind {
    Start,
    Set,
    Assign,
    Check,
    Prompt,
    Ask,
    Execute,
    Call,
    Success,
    Failed,
    On,
}

impl ActivityKind {
    pub const ALL: [ActivityKind; 11] = [
        ActivityKind::Start,
        ActivityKind::Set,
        ActivityKind::Assign,
        ActivityKind::Check,
        ActivityKind::Prompt,
        ActivityKind::Ask,
        ActivityKind::Execute,
        ActivityKind::Call,
        ActivityKind::Success,
        ActivityKind::Failed,
        ActivityKind::On,
    ];

    /// Upper case tag as used in activity names
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Start => "START",
            ActivityKind::Set => "SET",
            ActivityKind::Assign => "ASSIGN",
            ActivityKind::Check => "CHECK",
            ActivityKind::Prompt => "PROMPT",
            ActivityKind::Ask => "ASK",
            ActivityKind::Execute => "EXECUTE",
            ActivityKind::Call => "CALL",
            ActivityKind::Success => "SUCCESS",
            ActivityKind::Failed => "FAILED",
            ActivityKind::On => "ON",
        }
    }

    /// Label shown in front of the expression in diagram nodes
    pub fn label(&self) -> &'static str {
        match self {
            ActivityKind::Start => "Start",
            ActivityKind::Set => "Set",
            ActivityKind::Assign => "Assign",
            ActivityKind::Check => "Check",
            ActivityKind::Prompt => "Prompt",
            ActivityKind::Ask => "Ask",
            ActivityKind::Execute => "Execute",
            ActivityKind::Call => "Call",
            ActivityKind::Success => "SUCCESS",
            ActivityKind::Failed => "FAILED",
            ActivityKind::On => "ON",
        }
    }

    /// Derive the kind from an activity name such as `CHECK_GIT`
    pub fn from_name(name: &str) -> Option<Self> {
        let prefix = name.split('_').next().unwrap_or(name);
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(prefix))
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Created,
    Doing,
    Success,
    Failed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Created => "CREATED",
            Status::Doing => "DOING",
            Status::Success => "SUCCESS",
            Status::Failed => "FAILED",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CREATED" => Ok(Status::Created),
            "DOING" => Ok(Status::Doing),
            "SUCCESS" => Ok(Status::Success),
            "FAILED" => Ok(Status::Failed),
            other => Err(format!("unknown status {:?}", other)),
        }
    }
}

/// Which edge of an activity a flowchart label selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeLabel {
    /// Followed when the activity succeeded
    Next,
    /// Followed when the activity failed
    Other,
}

impl EdgeLabel {
    /// Interpret a `|LABEL|`; the empty label is a success edge
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "" | "YES" | "TRUE" | "OK" | "SUCCESS" => Some(EdgeLabel::Next),
            "NO" | "FALSE" | "OTHER" | "ELSE" | "FAIL" | "FAILED" | "ERROR" => {
                Some(EdgeLabel::Other)
            }
            _ => None,
        }
    }
}

/// One node of the workflow graph
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Activity {
    pub kind: ActivityKind,
    /// Unique name within the workflow
    pub name: String,
    /// Operand, its grammar depends on the kind
    pub expression: String,
    /// Activity followed on success
    pub next: Option<String>,
    /// Activity followed on failure
    pub other: Option<String>,
}

impl Activity {
    /// Create a new activity without edges
    pub fn new(kind: ActivityKind, name: &str, expression: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            expression: expression.to_string(),
            next: None,
            other: None,
        }
    }
}

/// A complete workflow definition
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Workflow {
    /// File the workflow was read from
    pub filepath: PathBuf,

    /// Directory used for sub-workflows and `file:` variables
    pub directory: PathBuf,

    pub name: String,

    pub description: String,

    /// Default variable bindings
    pub params: IndexMap<String, String>,

    /// Prompt blocks keyed by id, e.g. `User TestGit`
    pub prompts: IndexMap<String, Prompt>,

    /// All activities, in declaration order
    pub activities: IndexMap<String, Activity>,

    pub start: Option<String>,

    pub on_success: Option<String>,

    pub on_failed: Option<String>,
}

impl Workflow {
    /// Look up an activity by name
    pub fn activity(&self, name: &str) -> Option<&Activity> {
        self.activities.get(name)
    }

    /// Prompt with `id`, also accepting the id without its role prefix
    pub fn prompt(&self, id: &str) -> Option<&Prompt> {
        self.prompts.get(id).or_else(|| {
            self.prompts
                .iter()
                .find(|(key, prompt)| {
                    key.strip_prefix(prompt.role.title())
                        .map(|rest| rest.trim() == id)
                        .unwrap_or(false)
                })
                .map(|(_, prompt)| prompt)
        })
    }

    /// Names referenced by edges that have no activity
    pub fn dangling_edges(&self) -> Vec<(String, String)> {
        let mut dangling = Vec::new();
        for activity in self.activities.values() {
            for target in [&activity.next, &activity.other].into_iter().flatten() {
                if !self.activities.contains_key(target) {
                    dangling.push((activity.name.clone(), target.clone()));
                }
            }
        }
        dangling
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Role;

    #[test]
    fn test_kind_from_name() {
        assert_eq!(ActivityKind::from_name("START"), Some(ActivityKind::Start));
        assert_eq!(ActivityKind::from_name("check_git"), Some(ActivityKind::Check));
        assert_eq!(ActivityKind::from_name("ON_FAILED"), Some(ActivityKind::On));
        assert_eq!(ActivityKind::from_name("Execute"), Some(ActivityKind::Execute));
        assert_eq!(ActivityKind::from_name("LOOP_1"), None);
        assert_eq!(ActivityKind::from_name("SETTING"), None);
    }

    #[test]
    fn test_edge_labels() {
        for label in ["", "YES", "true", "Ok", "SUCCESS"] {
            assert_eq!(EdgeLabel::parse(label), Some(EdgeLabel::Next));
        }
        for label in ["NO", "false", "OTHER", "ELSE", "FAIL", "FAILED", "error"] {
            assert_eq!(EdgeLabel::parse(label), Some(EdgeLabel::Other));
        }
        assert_eq!(EdgeLabel::parse("MAYBE"), None);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [Status::Created, Status::Doing, Status::Success, Status::Failed] {
            assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
        }
        assert!("DONE".parse::<Status>().is_err());
    }

    #[test]
    fn test_prompt_lookup_without_role() {
        let mut workflow = Workflow::default();
        workflow.prompts.insert(
            "User TestGit".to_string(),
            Prompt::new(Role::User, "run git"),
        );
        assert!(workflow.prompt("User TestGit").is_some());
        assert!(workflow.prompt("TestGit").is_some());
        assert!(workflow.prompt("Other").is_none());
    }

    #[test]
    fn test_dangling_edges() {
        let mut workflow = Workflow::default();
        let mut start = Activity::new(ActivityKind::Start, "START", "");
        start.next = Some("SUCCESS".to_string());
        workflow.activities.insert("START".to_string(), start);
        assert_eq!(
            workflow.dangling_edges(),
            vec![("START".to_string(), "SUCCESS".to_string())]
        );
    }
}
