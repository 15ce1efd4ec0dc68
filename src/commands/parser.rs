//! Extraction of commands from fenced code blocks in free-form text
//!
//! Shell blocks are split into logical lines: a trailing backslash continues
//! the line, and indented lines belong to the control block (`for`, `if`,
//! `while`, ...) opened above them. Other languages produce one command per
//! block.

use tracing::debug;

use super::{Command, CommandKind};

const FENCE: &str = "```";

/// Parser for agent replies
#[derive(Debug, Default, Clone, Copy)]
pub struct Parser;

/// Accumulates the lines of one fenced shell block
#[derive(Default)]
struct ShellSplitter {
    buffer: String,
    collapsing: bool,
    in_block: bool,
    commands: Vec<String>,
}

impl ShellSplitter {
    fn push_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }

        if self.collapsing {
            self.buffer.push_str(line.trim_start());
        } else if line.starts_with(char::is_whitespace) && !self.buffer.is_empty() {
            self.buffer.push('\n');
            self.buffer.push_str(line.trim_end());
            self.in_block = true;
        } else if self.in_block {
            // closing keyword of the block (done, fi, esac, ...)
            self.buffer.push('\n');
            self.buffer.push_str(line.trim_end());
            self.in_block = false;
        } else {
            self.emit();
            if line.trim_start().starts_with('#') {
                return;
            }
            self.buffer.push_str(line.trim());
        }

        self.collapsing = self.buffer.ends_with('\\');
        if self.collapsing {
            self.buffer.pop();
            let kept = self.buffer.trim_end().len();
            self.buffer.truncate(kept);
            self.buffer.push(' ');
        }
    }

    fn emit(&mut self) {
        let command = self.buffer.trim_end();
        if !command.is_empty() {
            self.commands.push(command.to_string());
        }
        self.buffer.clear();
        self.in_block = false;
        self.collapsing = false;
    }

    fn finish(mut self) -> Vec<String> {
        self.emit();
        self.commands
    }
}

impl Parser {
    pub fn new() -> Self {
        Self
    }

    /// Parse `text` and return the commands of all closed fenced blocks
    ///
    /// A block that is never closed is dropped.
    pub fn parse(&self, text: &str) -> Vec<Command> {
        let mut commands = Vec::new();
        let mut current: Option<(CommandKind, Vec<&str>)> = None;

        for line in text.lines() {
            if line.trim_start().starts_with(FENCE) {
                match current.take() {
                    None => {
                        let tag = line.trim_start().trim_start_matches('`');
                        current = Some((CommandKind::from_tag(tag), Vec::new()));
                    }
                    Some((kind, lines)) => commands.extend(Self::block_commands(kind, &lines)),
                }
            } else if let Some((_, lines)) = current.as_mut() {
                lines.push(line);
            }
        }

        if let Some((kind, lines)) = current {
            debug!(
                "Dropping unclosed {} block with {} lines",
                kind,
                lines.len()
            );
        }
        commands
    }

    fn block_commands(kind: CommandKind, lines: &[&str]) -> Vec<Command> {
        if kind.is_shell() {
            let mut splitter = ShellSplitter::default();
            for line in lines {
                splitter.push_line(line);
            }
            splitter
                .finish()
                .into_iter()
                .filter_map(|cmd| Command::shell(&cmd))
                .collect()
        } else {
            let body: Vec<&str> = lines
                .iter()
                .copied()
                .filter(|line| !line.is_empty())
                .collect();
            if body.is_empty() {
                return Vec::new();
            }
            Command::create(kind, vec![body.join("\n")])
                .into_iter()
                .collect()
        }
    }
}
