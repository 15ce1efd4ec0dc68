// Console formats and protocol constants shared across the engine
#![allow(dead_code)]

pub const FORMAT_RESET: &str = "\x1b[0m";
pub const FORMAT_BOLD: &str = "\x1b[1m";
pub const FORMAT_GRAY: &str = "\x1b[90m";
pub const FORMAT_RED: &str = "\x1b[31m";
pub const FORMAT_GREEN: &str = "\x1b[32m";
pub const FORMAT_YELLOW: &str = "\x1b[33m";
pub const FORMAT_CYAN: &str = "\x1b[36m";

// Workflow documents
pub const WORKFLOW_SUFFIX: &str = ".wf.md";
pub const HISTORY_SUFFIX: &str = ".wfh.md";

// Marker protocol
pub const SHELL_MARKER_PREFIX: &str = "__CMD_DONE_";
pub const SSH_BEGIN_PREFIX: &str = "__BEGIN_";
pub const SSH_END_PREFIX: &str = "__END_";
pub const MARKER_SUFFIX: &str = "__";

// Defaults, overridable through the environment
pub const DEFAULT_MAX_HITS: u32 = 3;
pub const DEFAULT_HISTORY_MAX_RECORD_LENGTH: usize = 4000;
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_COMMAND_INACTIVITY_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_SSH_USER: &str = "mentor";

/// Names longer than this are treated as literal text, never looked up
pub const MAX_VARIABLE_NAME_LENGTH: usize = 100;

pub const HELP_TEMPLATE: &str = r#"
# codementor

Run Markdown workflows that mix agent prompts with shell commands.

## Commands
  run <file-or-name> [-p key=value]...   Execute a workflow
  check <file>                           Parse a workflow and print its graph
  render <file>                          Print the workflow re-written in canonical form
  list                                   List workflows in WORKFLOWS_DIR

## Workflow document
  free text                 description
  # Workflow                a ```mermaid flowchart block
  # Prompts                 `## <Role> <id>` sections (System, User, Assistant)

## Environment
  WORKFLOWS_DIR, OUTPUT_DIR, MAX_HITS, SHELL, COMMAND_TIMEOUT,
  COMMAND_INACTIVITY_TIMEOUT, SHELLBOX_HOST, SHELLBOX_PORT, SHELLBOX_USER,
  SHELLBOX_PASSWORD, SHELLBOX_SSH_KEYFILE, LOGLEVEL
"#;
