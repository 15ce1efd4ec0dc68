//! Agent answered by the operator on the console
//!
//! Prompts are printed to stdout and the reply is read from the input stream
//! until a line holding a single `.` or end of input.

use async_trait::async_trait;
use lazy_static::lazy_static;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tracing::debug;

use super::conversation::{AgentUsage, Conversation};
use super::prompt::Role;
use super::{Agent, AgentError};
use crate::constants::{FORMAT_BOLD, FORMAT_CYAN, FORMAT_GRAY, FORMAT_RESET};
use crate::text::preview;

/// Line terminating a multi-line reply
const END_OF_REPLY: &str = ".";

type SharedReader = Arc<Mutex<Box<dyn AsyncBufRead + Unpin + Send>>>;

lazy_static! {
    static ref STDIN: ConsoleInput = ConsoleInput::from_reader(BufReader::new(tokio::io::stdin()));
}

/// Buffered line input shared by everything reading the console
///
/// Clones read from the same buffer, so input read ahead by one reader is
/// seen by the next.
#[derive(Clone)]
pub struct ConsoleInput {
    reader: SharedReader,
}

impl ConsoleInput {
    /// The process stdin
    pub fn stdin() -> Self {
        STDIN.clone()
    }

    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        Self {
            reader: Arc::new(Mutex::new(Box::new(reader))),
        }
    }

    /// Read one line without its line ending; None at end of input
    pub async fn read_line(&self) -> std::io::Result<Option<String>> {
        let mut line = String::new();
        let read = self.reader.lock().await.read_line(&mut line).await?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

impl Default for ConsoleInput {
    fn default() -> Self {
        Self::stdin()
    }
}

pub struct ConsoleAgent {
    input: ConsoleInput,
    conversation: Conversation,
    echo: bool,
}

impl ConsoleAgent {
    /// Create an agent reading replies from stdin
    pub fn new() -> Self {
        Self::with_console(ConsoleInput::stdin())
    }

    /// Create an agent reading replies from an arbitrary stream
    pub fn with_input<R>(input: R) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        Self::with_console(ConsoleInput::from_reader(input))
    }

    /// Create an agent reading replies from a shared console input
    pub fn with_console(input: ConsoleInput) -> Self {
        Self {
            input,
            conversation: Conversation::new(),
            echo: true,
        }
    }

    /// Disable printing prompts to stdout
    pub fn quiet(mut self) -> Self {
        self.echo = false;
        self
    }

    async fn read_reply(&mut self) -> Result<String, AgentError> {
        let mut lines = Vec::new();
        let mut reached_end = false;
        loop {
            let Some(line) = self.input.read_line().await? else {
                reached_end = true;
                break;
            };
            if line.trim() == END_OF_REPLY {
                break;
            }
            lines.push(line);
        }

        if reached_end && lines.is_empty() {
            return Err(AgentError::EndOfInput);
        }
        Ok(lines.join("\n"))
    }
}

impl Default for ConsoleAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for ConsoleAgent {
    async fn system(&mut self, prompt: &str) -> Result<String, AgentError> {
        self.conversation.reset(prompt);
        if self.echo {
            println!("{}{}System:{}\n{}", FORMAT_BOLD, FORMAT_CYAN, FORMAT_RESET, prompt);
        }
        Ok(String::new())
    }

    async fn ask(&mut self, prompt: &str) -> Result<String, AgentError> {
        self.conversation.push(Role::User, prompt);
        if self.echo {
            println!("{}{}User:{}\n{}", FORMAT_BOLD, FORMAT_CYAN, FORMAT_RESET, prompt);
            println!(
                "{}(type the answer, finish with a line holding a single '.'){}",
                FORMAT_GRAY, FORMAT_RESET
            );
        }

        let started = Instant::now();
        let reply = self.read_reply().await?;
        self.conversation
            .record(prompt, &reply, started.elapsed(), None);
        self.conversation.push(Role::Assistant, &reply);
        debug!("console reply: {}", preview(&reply));
        Ok(reply)
    }

    fn advice(&mut self, question: Option<&str>, answer: Option<&str>) {
        if let Some(question) = question {
            self.conversation.push(Role::User, question);
        }
        if let Some(answer) = answer {
            self.conversation.push(Role::Assistant, answer);
        }
    }

    fn usage(&self) -> &AgentUsage {
        self.conversation.usage()
    }

    fn model_name(&self) -> &str {
        "console"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_multi_line_reply() {
        let input: &'static [u8] = b"first\nsecond\n.\nnext\n";
        let mut agent = ConsoleAgent::with_input(input).quiet();

        let reply = agent.ask("question?").await.unwrap();
        assert_eq!(reply, "first\nsecond");
        assert_eq!(agent.usage().total_iterations, 1);

        let reply = agent.ask("again?").await.unwrap();
        assert_eq!(reply, "next");
    }

    #[tokio::test]
    async fn test_end_of_input() {
        let input: &'static [u8] = b"";
        let mut agent = ConsoleAgent::with_input(input).quiet();
        assert!(matches!(
            agent.ask("anyone?").await,
            Err(AgentError::EndOfInput)
        ));
    }

    #[tokio::test]
    async fn test_shared_input_keeps_read_ahead() {
        let input: &'static [u8] = b"yes\nno\nagent answer\n.\n";
        let console = ConsoleInput::from_reader(input);
        let mut agent = ConsoleAgent::with_console(console.clone()).quiet();

        assert_eq!(console.read_line().await.unwrap().as_deref(), Some("yes"));
        assert_eq!(console.read_line().await.unwrap().as_deref(), Some("no"));
        assert_eq!(agent.ask("question?").await.unwrap(), "agent answer");
        assert_eq!(console.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_system_returns_empty() {
        let input: &'static [u8] = b"";
        let mut agent = ConsoleAgent::with_input(input).quiet();
        assert_eq!(agent.system("be strict").await.unwrap(), "");
    }
}
