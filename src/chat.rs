//! Chat domain types shared by the session manager, template renderer and
//! storage collaborators.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    /// Parse a wire role string. Case-insensitive; anything unrecognized is
    /// treated as a user message.
    pub fn parse(role: &str) -> Self {
        match role.to_lowercase().as_str() {
            "assistant" => MessageRole::Assistant,
            "system" => MessageRole::System,
            _ => MessageRole::User,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

/// A single chat message. Immutable once created; the one exception is the
/// in-flight assistant message whose content accumulates while a generation
/// streams (see `session`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub role: MessageRole,
    pub content: String,
    /// Milliseconds since the epoch; messages are ordered by this within a chat.
    pub timestamp_ms: i64,
    pub token_count: usize,
}

impl Message {
    /// Build a message with a fresh id and the current timestamp.
    pub fn new(chat_id: impl Into<String>, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.into(),
            role,
            content: content.into(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            token_count: 0,
        }
    }
}
