//! Agent capability used by PROMPT activities
//!
//! The engine does not talk to any model vendor itself. It drives whatever
//! implements [`Agent`]; the crate ships a console agent where the operator
//! answers the prompts.

pub use async_trait::async_trait;

pub mod console;
mod conversation;
pub mod prompt;

pub use self::console::{ConsoleAgent, ConsoleInput};
pub use self::conversation::{AgentUsage, Conversation, Message};
pub use self::prompt::{InvalidRole, Prompt, Role};

/// Errors that can occur when talking to an agent
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No more input available")]
    EndOfInput,

    #[error("Agent error: {0}")]
    Backend(String),
}

/// Common trait for all agents
#[async_trait]
pub trait Agent: Send {
    /// Start a new session with the given system prompt
    async fn system(&mut self, prompt: &str) -> Result<String, AgentError>;

    /// Send a user prompt and wait for the reply
    async fn ask(&mut self, prompt: &str) -> Result<String, AgentError>;

    /// Inject a question and/or answer into the session without a round trip
    fn advice(&mut self, question: Option<&str>, answer: Option<&str>);

    /// Usage counters accumulated so far
    fn usage(&self) -> &AgentUsage;

    /// Name of the model answering
    fn model_name(&self) -> &str;
}

#[cfg(test)]
pub mod testing {
    //! Agent double with queued replies

    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Call made to a [`ScriptedAgent`]
    #[derive(Debug, Clone, PartialEq)]
    pub enum AgentCall {
        System(String),
        Ask(String),
        Advice(Option<String>, Option<String>),
    }

    /// Agent answering from a queue and recording every call
    pub struct ScriptedAgent {
        replies: VecDeque<String>,
        calls: Arc<Mutex<Vec<AgentCall>>>,
        conversation: Conversation,
    }

    impl ScriptedAgent {
        pub fn new(replies: &[&str]) -> Self {
            Self {
                replies: replies.iter().map(|r| r.to_string()).collect(),
                calls: Arc::new(Mutex::new(Vec::new())),
                conversation: Conversation::new(),
            }
        }

        /// Handle to inspect calls after the agent was moved into a context
        pub fn calls(&self) -> Arc<Mutex<Vec<AgentCall>>> {
            Arc::clone(&self.calls)
        }
    }

    #[async_trait]
    impl Agent for ScriptedAgent {
        async fn system(&mut self, prompt: &str) -> Result<String, AgentError> {
            self.calls
                .lock()
                .unwrap()
                .push(AgentCall::System(prompt.to_string()));
            self.conversation.reset(prompt);
            Ok(String::new())
        }

        async fn ask(&mut self, prompt: &str) -> Result<String, AgentError> {
            self.calls
                .lock()
                .unwrap()
                .push(AgentCall::Ask(prompt.to_string()));
            let reply = self
                .replies
                .pop_front()
                .ok_or_else(|| AgentError::Backend("no scripted reply left".to_string()))?;
            self.conversation.record(
                prompt,
                &reply,
                std::time::Duration::from_millis(1),
                Some((1, 1)),
            );
            Ok(reply)
        }

        fn advice(&mut self, question: Option<&str>, answer: Option<&str>) {
            self.calls.lock().unwrap().push(AgentCall::Advice(
                question.map(str::to_string),
                answer.map(str::to_string),
            ));
        }

        fn usage(&self) -> &AgentUsage {
            self.conversation.usage()
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }
}
