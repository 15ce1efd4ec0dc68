//! Message log and usage accounting shared by agent implementations

use serde::Serialize;
use std::time::Duration;

use super::prompt::Role;

/// Aggregated usage counters of an agent
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentUsage {
    pub total_duration_sec: f64,
    pub total_iterations: u64,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_tokens: u64,
    pub total_prompt_chars: u64,
    pub total_completion_chars: u64,
    pub total_chars: u64,
}

/// One turn of a conversation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Ordered message log of one agent session
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    usage: AgentUsage,
}

impl Conversation {
    /// Create an empty conversation
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all messages and start over with a system prompt
    pub fn reset(&mut self, system: &str) {
        self.messages.clear();
        self.push(Role::System, system);
    }

    /// Append a message; empty content is ignored
    pub fn push(&mut self, role: Role, content: &str) {
        if content.is_empty() {
            return;
        }
        self.messages.push(Message {
            role,
            content: content.to_string(),
        });
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn usage(&self) -> &AgentUsage {
        &self.usage
    }

    /// Account for one prompt/completion round trip
    ///
    /// Token counts are optional since not every agent can report them.
    pub fn record(
        &mut self,
        prompt: &str,
        completion: &str,
        elapsed: Duration,
        tokens: Option<(u64, u64)>,
    ) {
        let prompt_chars = prompt.chars().count() as u64;
        let completion_chars = completion.chars().count() as u64;

        self.usage.total_iterations += 1;
        self.usage.total_duration_sec += elapsed.as_secs_f64();
        self.usage.total_prompt_chars += prompt_chars;
        self.usage.total_completion_chars += completion_chars;
        self.usage.total_chars += prompt_chars + completion_chars;

        if let Some((prompt_tokens, completion_tokens)) = tokens {
            self.usage.total_prompt_tokens += prompt_tokens;
            self.usage.total_completion_tokens += completion_tokens;
            self.usage.total_tokens += prompt_tokens + completion_tokens;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_keeps_only_system() {
        let mut conversation = Conversation::new();
        conversation.push(Role::User, "hi");
        conversation.push(Role::Assistant, "hello");
        conversation.reset("be brief");

        assert_eq!(conversation.messages().len(), 1);
        assert_eq!(conversation.messages()[0].role, Role::System);
    }

    #[test]
    fn test_empty_messages_are_skipped() {
        let mut conversation = Conversation::new();
        conversation.push(Role::User, "");
        assert!(conversation.messages().is_empty());
    }

    #[test]
    fn test_usage_accumulates() {
        let mut conversation = Conversation::new();
        conversation.record("abc", "de", Duration::from_millis(500), Some((10, 5)));
        conversation.record("x", "", Duration::from_millis(500), None);

        let usage = conversation.usage();
        assert_eq!(usage.total_iterations, 2);
        assert_eq!(usage.total_prompt_chars, 4);
        assert_eq!(usage.total_completion_chars, 2);
        assert_eq!(usage.total_chars, 6);
        assert_eq!(usage.total_tokens, 15);
        assert!((usage.total_duration_sec - 1.0).abs() < 1e-9);
    }
}
