//! Per-session conversation history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;
use crate::message::Role;

/// One persisted turn. Append-only, ordered by creation time within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub channel: String,
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Model that produced an assistant turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<serde_json::Value>,
    /// Approximate, from the 4-chars-per-token estimate
    pub token_count: usize,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(
        session_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
        channel: impl Into<String>,
        sender_id: impl Into<String>,
    ) -> Self {
        let content = content.into();
        Self {
            session_id: session_id.into(),
            role,
            token_count: content.len().div_ceil(4),
            content,
            channel: channel.into(),
            sender_id: sender_id.into(),
            sender_name: None,
            model: None,
            tool_calls: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_tool_calls(mut self, calls: serde_json::Value) -> Self {
        self.tool_calls = Some(calls);
        self
    }
}

/// Storage for conversation turns.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn append(&self, turn: ConversationTurn) -> std::result::Result<(), MemoryError>;

    /// Up to `limit` most recent turns of a session, **newest first**.
    async fn recent(
        &self,
        session_id: &str,
        limit: usize,
    ) -> std::result::Result<Vec<ConversationTurn>, MemoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_count_rounds_up() {
        let turn = ConversationTurn::new("s", Role::User, "hello", "web", "alice");
        assert_eq!(turn.token_count, 2);
        let empty = ConversationTurn::new("s", Role::User, "", "web", "alice");
        assert_eq!(empty.token_count, 0);
    }

    #[test]
    fn builders_set_optional_fields() {
        let turn = ConversationTurn::new("s", Role::Assistant, "done", "cli", "op")
            .with_model("ollama/qwen2.5:7b")
            .with_sender_name("Operator");
        assert_eq!(turn.model.as_deref(), Some("ollama/qwen2.5:7b"));
        assert_eq!(turn.sender_name.as_deref(), Some("Operator"));
        assert!(turn.tool_calls.is_none());
    }
}
