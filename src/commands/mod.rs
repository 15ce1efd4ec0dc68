//! Commands extracted from agent replies and the executors running them
//!
//! A [`Command`] is a transient value: the parser creates it, an executor
//! fills in `output` and `exit_code`, and the interpreter copies the text into
//! the result register and the history.

pub use async_trait::async_trait;

pub mod parser;
pub mod shell;
pub mod ssh;

use std::fmt;

use tracing::info;

use crate::config::EngineConfig;

pub use self::parser::Parser;
pub use self::shell::ShellExecutor;
pub use self::ssh::SshExecutor;

/// Fenced-block language tags executed by the shell executors
const SHELL_ALIASES: [&str; 5] = ["sh", "shell", "bash", "powershell", "cmd"];

/// Language of a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    /// Anything the persistent shell can run
    Shell,
    /// Any other fenced block, keeping its language tag
    Other(String),
}

impl CommandKind {
    /// Normalize a fenced-block language tag
    pub fn from_tag(tag: &str) -> Self {
        let tag = tag.trim();
        if SHELL_ALIASES.contains(&tag.to_ascii_lowercase().as_str()) {
            CommandKind::Shell
        } else {
            CommandKind::Other(tag.to_string())
        }
    }

    pub fn is_shell(&self) -> bool {
        matches!(self, CommandKind::Shell)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::Shell => write!(f, "sh"),
            CommandKind::Other(tag) => write!(f, "{}", tag),
        }
    }
}

/// A command plus the result of running it
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub kind: CommandKind,
    /// Shell: one logical line; other languages: the whole block
    pub cmds: Vec<String>,
    pub exit_code: i32,
    pub output: String,
}

impl Command {
    /// Create a command, refusing empty ones
    pub fn create(kind: CommandKind, cmds: Vec<String>) -> Option<Self> {
        if cmds.is_empty() {
            return None;
        }
        if kind.is_shell() && cmds.iter().all(|cmd| cmd.trim().is_empty()) {
            return None;
        }
        Some(Self {
            kind,
            cmds,
            exit_code: 0,
            output: String::new(),
        })
    }

    /// Create a single-line shell command
    pub fn shell(line: &str) -> Option<Self> {
        Self::create(CommandKind::Shell, vec![line.to_string()])
    }

    /// Command text as it would be typed
    pub fn text(&self) -> String {
        self.cmds.join("\n")
    }

    /// Mark a non-shell command as not executed
    pub(crate) fn skip(&mut self) -> i32 {
        self.output = format!("(skipped: {} blocks are not executed)", self.kind);
        self.exit_code = 0;
        self.exit_code
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:?}", self.kind, self.cmds)
    }
}

/// Errors raised while driving a shell session
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Command timed out: {0}")]
    Timeout(String),

    #[error("Shell process terminated")]
    ShellTerminated,

    #[error("Output channel closed")]
    ChannelClosed,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("Executor is not open")]
    NotOpen,
}

/// Capability running commands in a persistent session
#[async_trait]
pub trait CommandExecutor: Send {
    /// Run the command, filling in its output; returns the exit hint
    ///
    /// Errors never escape: they are recorded in the command with exit code 1.
    async fn execute(&mut self, command: &mut Command) -> i32;

    /// End the session; calling it again has no effect
    async fn close(&mut self);
}

/// Create the executor selected by the configuration
///
/// A configured shell box selects SSH, otherwise a local shell is started.
pub async fn create_executor(
    config: &EngineConfig,
) -> Result<Box<dyn CommandExecutor>, CommandError> {
    match &config.ssh {
        Some(ssh) => {
            info!("Using SSH executor on {}@{}:{}", ssh.user, ssh.host, ssh.port);
            Ok(Box::new(SshExecutor::connect(ssh).await?))
        }
        None => {
            info!("Using local shell executor: {}", config.shell);
            Ok(Box::new(
                ShellExecutor::start(&config.shell, config.shell_command_timeout).await?,
            ))
        }
    }
}

/// Strip one leading and one trailing blank line
pub(crate) fn strip_blank_edges(mut output: String) -> String {
    if output.starts_with('\n') {
        output.remove(0);
    }
    if output.ends_with('\n') {
        output.pop();
    }
    output
}

#[cfg(test)]
pub mod testing {
    //! Executor double returning canned outputs

    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    pub struct RecordingExecutor {
        responses: VecDeque<(i32, String)>,
        executed: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingExecutor {
        /// Each executed command takes the next `(exit_code, output)` pair;
        /// once the queue is empty commands succeed with empty output
        pub fn new(responses: &[(i32, &str)]) -> Self {
            Self {
                responses: responses
                    .iter()
                    .map(|(code, out)| (*code, out.to_string()))
                    .collect(),
                executed: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn executed(&self) -> Arc<Mutex<Vec<String>>> {
            Arc::clone(&self.executed)
        }
    }

    #[async_trait]
    impl CommandExecutor for RecordingExecutor {
        async fn execute(&mut self, command: &mut Command) -> i32 {
            if !command.kind.is_shell() {
                return command.skip();
            }
            self.executed.lock().unwrap().push(command.text());
            let (code, output) = self.responses.pop_front().unwrap_or((0, String::new()));
            command.exit_code = code;
            command.output = output;
            code
        }

        async fn close(&mut self) {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_aliases() {
        for tag in ["sh", "shell", "BASH", "powershell", "cmd", " bash "] {
            assert_eq!(CommandKind::from_tag(tag), CommandKind::Shell);
        }
        assert_eq!(
            CommandKind::from_tag("python"),
            CommandKind::Other("python".to_string())
        );
        assert_eq!(CommandKind::from_tag(""), CommandKind::Other(String::new()));
    }

    #[test]
    fn test_create_rejects_empty() {
        assert!(Command::create(CommandKind::Shell, vec![]).is_none());
        assert!(Command::create(CommandKind::Shell, vec!["  ".to_string()]).is_none());
        assert!(Command::shell("ls").is_some());
        assert!(Command::create(CommandKind::Other("python".into()), vec!["".into()]).is_some());
    }

    #[test]
    fn test_skip_other_kinds() {
        let mut command =
            Command::create(CommandKind::Other("python".into()), vec!["print(1)".into()]).unwrap();
        assert_eq!(command.skip(), 0);
        assert!(command.output.contains("python"));
    }

    #[test]
    fn test_strip_blank_edges() {
        assert_eq!(strip_blank_edges("\nHello\n".to_string()), "Hello");
        assert_eq!(strip_blank_edges("\n\nHello".to_string()), "\nHello");
        assert_eq!(strip_blank_edges("Hello".to_string()), "Hello");
    }
}
