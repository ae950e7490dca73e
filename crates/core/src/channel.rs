//! Channel adapter trait and the normalized message it produces.
//!
//! A channel adapter connects OpsClaw to a conversational surface (web
//! dashboard, chat apps, CLI). It converts channel-native payloads into a
//! [`NormalizedMessage`] and delivers response text back. The message router
//! depends only on [`ChannelAdapter`], never on a concrete channel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChannelError;
use crate::session::derive_session_id;

/// Kind of media attached to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
    Voice,
}

/// A media attachment. Owned by its message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub kind: MediaKind,

    /// URL or file path
    pub url: String,

    pub mime_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    /// File size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

/// The unit of work flowing from a channel into the router.
///
/// Fields are fixed at construction. The only later mutation is
/// [`NormalizedMessage::ensure_session_id`], which backfills a derived
/// session id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedMessage {
    id: String,
    channel: String,
    sender_id: String,
    sender_name: String,
    text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    media: Vec<MediaAttachment>,
    #[serde(default)]
    is_group: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    raw: serde_json::Value,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    metadata: serde_json::Map<String, serde_json::Value>,
}

impl NormalizedMessage {
    /// A direct (non-group) message with a fresh id and the current time.
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let sender_id = sender_id.into();
        Self {
            id: Uuid::new_v4().simple().to_string(),
            channel: channel.into(),
            sender_name: sender_id.clone(),
            sender_id,
            text: text.into(),
            media: Vec::new(),
            is_group: false,
            group_id: None,
            reply_to: None,
            session_id: None,
            timestamp: Utc::now(),
            raw: serde_json::Value::Null,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = name.into();
        self
    }

    /// Mark the message as posted in a group chat.
    pub fn in_group(mut self, group_id: impl Into<String>) -> Self {
        self.is_group = true;
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_media(mut self, attachment: MediaAttachment) -> Self {
        self.media.push(attachment);
        self
    }

    pub fn replying_to(mut self, message_id: impl Into<String>) -> Self {
        self.reply_to = Some(message_id.into());
        self
    }

    /// Use a caller-supplied session id instead of the derived one.
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = raw;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn sender_name(&self) -> &str {
        &self.sender_name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn media(&self) -> &[MediaAttachment] {
        &self.media
    }

    pub fn is_group(&self) -> bool {
        self.is_group
    }

    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn raw(&self) -> &serde_json::Value {
        &self.raw
    }

    pub fn metadata(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.metadata
    }

    /// Where replies go: the group for group messages, the sender otherwise.
    pub fn chat_id(&self) -> &str {
        match (self.is_group, self.group_id.as_deref()) {
            (true, Some(group)) => group,
            _ => &self.sender_id,
        }
    }

    /// Return the session id, deriving and storing it first if unset.
    pub fn ensure_session_id(&mut self) -> &str {
        if self.session_id.is_none() {
            self.session_id = Some(derive_session_id(&self.channel, self.chat_id()));
        }
        self.session_id.as_deref().unwrap_or_default()
    }
}

/// The capability set every channel implements.
///
/// `send_media` and `send_typing` are optional; their defaults report the
/// capability as unsupported or do nothing.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Channel identifier (e.g., "web", "telegram", "cli").
    fn name(&self) -> &str;

    /// Convert a channel-native payload. `None` means "ignore, do not route".
    async fn receive_message(&self, raw: serde_json::Value) -> Option<NormalizedMessage>;

    /// Deliver one response chunk for `message`.
    async fn send_response(
        &self,
        message: &NormalizedMessage,
        text: &str,
    ) -> std::result::Result<(), ChannelError>;

    async fn send_media(
        &self,
        _target: &str,
        _url: &str,
        _caption: Option<&str>,
    ) -> std::result::Result<(), ChannelError> {
        Err(ChannelError::Unsupported {
            channel: self.name().to_string(),
            capability: "send_media".into(),
        })
    }

    /// Best-effort typing indicator.
    async fn send_typing(&self, _chat_id: &str, _active: bool) -> std::result::Result<(), ChannelError> {
        Ok(())
    }

    async fn connect(&self) -> std::result::Result<(), ChannelError>;

    async fn disconnect(&self) -> std::result::Result<(), ChannelError>;

    fn is_connected(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_id_is_sender_for_direct_messages() {
        let msg = NormalizedMessage::new("telegram", "12345", "hi");
        assert_eq!(msg.chat_id(), "12345");
        assert!(!msg.is_group());
    }

    #[test]
    fn chat_id_is_group_for_group_messages() {
        let msg = NormalizedMessage::new("whatsapp", "alice", "hi").in_group("ops-team");
        assert_eq!(msg.chat_id(), "ops-team");
        assert_eq!(msg.sender_id(), "alice");
    }

    #[test]
    fn session_backfill_uses_chat_id() {
        let mut direct = NormalizedMessage::new("telegram", "alice", "hi");
        let mut grouped = NormalizedMessage::new("telegram", "bob", "hi").in_group("alice");
        assert!(direct.session_id().is_none());

        let a = direct.ensure_session_id().to_string();
        let b = grouped.ensure_session_id().to_string();
        assert_eq!(a, derive_session_id("telegram", "alice"));
        assert_eq!(a, b);
    }

    #[test]
    fn explicit_session_id_is_kept() {
        let mut msg = NormalizedMessage::new("web", "alice", "hi").with_session_id("browser-tab-1");
        assert_eq!(msg.ensure_session_id(), "browser-tab-1");
    }

    #[test]
    fn attachment_serialization() {
        let attachment = MediaAttachment {
            kind: MediaKind::Voice,
            url: "https://example.com/note.ogg".into(),
            mime_type: "audio/ogg".into(),
            filename: None,
            size_bytes: Some(2048),
            caption: None,
        };
        let json = serde_json::to_string(&attachment).unwrap();
        assert!(json.contains("\"voice\""));
        assert!(!json.contains("caption"));
    }

    struct Silent;

    #[async_trait]
    impl ChannelAdapter for Silent {
        fn name(&self) -> &str {
            "silent"
        }
        async fn receive_message(&self, _raw: serde_json::Value) -> Option<NormalizedMessage> {
            None
        }
        async fn send_response(
            &self,
            _message: &NormalizedMessage,
            _text: &str,
        ) -> std::result::Result<(), ChannelError> {
            Ok(())
        }
        async fn connect(&self) -> std::result::Result<(), ChannelError> {
            Ok(())
        }
        async fn disconnect(&self) -> std::result::Result<(), ChannelError> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn optional_capabilities_have_defaults() {
        let adapter = Silent;
        assert!(adapter.send_typing("chat", true).await.is_ok());
        let err = adapter.send_media("chat", "url", None).await.unwrap_err();
        assert!(matches!(err, ChannelError::Unsupported { .. }));
    }
}
