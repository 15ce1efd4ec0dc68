//! Prompt text blocks and the conversation role they are sent with

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Conversation role of a prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Capitalized form used in `## <Role> <id>` headers
    pub fn title(&self) -> &'static str {
        match self {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }

    /// Role implied by a prompt id when no prompt with that id exists
    ///
    /// `System` is the system prompt, ids starting with `Assistant ` inject an
    /// assistant turn, everything else is asked as the user.
    pub fn infer_from_id(id: &str) -> Self {
        if id.eq_ignore_ascii_case("system") {
            Role::System
        } else if id.to_ascii_lowercase().starts_with("assistant ") {
            Role::Assistant
        } else {
            Role::User
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.title())
    }
}

/// Error for a role name outside system, user and assistant
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Invalid role: {0:?}")]
pub struct InvalidRole(pub String);

impl FromStr for Role {
    type Err = InvalidRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(InvalidRole(s.to_string())),
        }
    }
}

/// A named block of prompt text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prompt {
    pub role: Role,
    /// Trimmed text of the prompt
    pub content: String,
}

impl Prompt {
    /// Create a new prompt, trimming its content
    pub fn new(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.trim().to_string(),
        }
    }
}
