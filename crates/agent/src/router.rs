//! Message routing: authorize, persist, think, deliver, audit.
//!
//! Every inbound [`NormalizedMessage`] goes through the same path regardless
//! of channel. The router only knows channels through [`ChannelAdapter`].
//!
//! There is no per-session lock. Two concurrent messages for one session may
//! interleave their turn writes; the last write wins.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::Utc;
use opsclaw_config::{default_max_message_length, AppConfig, ChannelConfig};
use opsclaw_core::channel::{ChannelAdapter, NormalizedMessage};
use opsclaw_core::conversation::ConversationTurn;
use opsclaw_core::event::{DomainEvent, EventBus};
use opsclaw_core::message::Role;
use opsclaw_security::{AllowlistPolicy, AuditLogger, AuditRecord, SenderCheckResult};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::brain::{SessionRef, TieredBrain};
use crate::context::ContextAssembler;
use crate::tier::Complexity;

/// Characters of the message text kept as the audit resource.
const AUDIT_RESOURCE_CHARS: usize = 200;
/// Characters of the message text carried in `MessageReceived`.
const EVENT_PREVIEW_CHARS: usize = 80;

/// Split preferences, best first. The separator stays with the earlier chunk.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    pub name: String,
    pub connected: bool,
}

/// Split `text` into contiguous chunks of at most `max_len` bytes.
///
/// Concatenating the chunks gives back `text` exactly. Cuts prefer a
/// paragraph break, then a line break, then the end of a sentence, then a
/// space, and only then land mid-word (on a char boundary).
pub fn split_message(text: &str, max_len: usize) -> Vec<&str> {
    let max_len = max_len.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.len() > max_len {
        let mut window_end = max_len;
        while !rest.is_char_boundary(window_end) {
            window_end -= 1;
        }
        let window = &rest[..window_end];

        let cut = SEPARATORS
            .iter()
            .find_map(|sep| {
                window
                    .rfind(sep)
                    .filter(|&idx| idx > 0)
                    .map(|idx| idx + sep.len())
            })
            .unwrap_or(window_end);
        // A single char wider than max_len
        let cut = if cut == 0 {
            rest.chars().next().map(char::len_utf8).unwrap_or(rest.len())
        } else {
            cut
        };

        let (chunk, tail) = rest.split_at(cut);
        chunks.push(chunk);
        rest = tail;
    }

    if !rest.is_empty() {
        chunks.push(rest);
    }
    chunks
}

/// Routes normalized messages from any channel through the brain.
pub struct MessageRouter {
    brain: Arc<TieredBrain>,
    context: Arc<ContextAssembler>,
    audit: Arc<AuditLogger>,
    channels: HashMap<String, ChannelConfig>,
    adapters: RwLock<HashMap<String, Arc<dyn ChannelAdapter>>>,
    events: Option<Arc<EventBus>>,
}

impl MessageRouter {
    pub fn new(
        brain: Arc<TieredBrain>,
        context: Arc<ContextAssembler>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            brain,
            context,
            audit,
            channels: HashMap::new(),
            adapters: RwLock::new(HashMap::new()),
            events: None,
        }
    }

    /// Per-channel allow-lists and chunk ceilings.
    pub fn with_channel_config(mut self, channels: HashMap<String, ChannelConfig>) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_config(self, config: &AppConfig) -> Self {
        self.with_channel_config(config.channels.clone())
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Register an adapter under its own name, replacing any previous one.
    pub fn register_adapter(&self, adapter: Arc<dyn ChannelAdapter>) {
        let name = adapter.name().to_string();
        info!(channel = %name, "Channel adapter registered");
        self.adapters
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, adapter);
    }

    pub fn adapter(&self, name: &str) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Connected flag of every registered adapter, sorted by name.
    pub fn channel_status(&self) -> Vec<ChannelStatus> {
        let mut status: Vec<ChannelStatus> = self
            .adapters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(name, adapter)| ChannelStatus {
                name: name.clone(),
                connected: adapter.is_connected(),
            })
            .collect();
        status.sort_by(|a, b| a.name.cmp(&b.name));
        status
    }

    /// Chunk ceiling for a channel.
    pub fn max_message_length(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .and_then(|c| c.max_message_length)
            .unwrap_or_else(|| default_max_message_length(channel))
    }

    pub fn brain(&self) -> &Arc<TieredBrain> {
        &self.brain
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    /// Route one message and return the response text.
    ///
    /// Unauthorized senders get an empty string and leave no trace besides a
    /// warning. Everything else produces exactly one `message.routed` audit
    /// record.
    pub async fn route(&self, mut message: NormalizedMessage) -> String {
        let started = Instant::now();
        let channel = message.channel().to_string();
        let sender = message.sender_id().to_string();

        if let SenderCheckResult::Denied { reason, .. } =
            AllowlistPolicy::check_sender(self.channels.get(&channel), &sender)
        {
            warn!(channel = %channel, sender = %sender, "Unauthorized sender: {reason}");
            return String::new();
        }

        let session_id = message.ensure_session_id().to_string();
        self.publish(DomainEvent::MessageReceived {
            channel: channel.clone(),
            sender_id: sender.clone(),
            session_id: session_id.clone(),
            content_preview: message.text().chars().take(EVENT_PREVIEW_CHARS).collect(),
            timestamp: Utc::now(),
        });

        let mut persisted = true;
        let mut user_turn = ConversationTurn::new(
            &session_id,
            Role::User,
            message.text(),
            &channel,
            &sender,
        );
        if !message.sender_name().is_empty() {
            user_turn = user_turn.with_sender_name(message.sender_name());
        }
        if let Err(e) = self.context.save_turn(user_turn).await {
            error!(session = %session_id, "Failed to persist user turn: {e}");
            persisted = false;
        }

        let reply = self
            .brain
            .think_detailed(
                message.text(),
                Complexity::Auto,
                Some(SessionRef {
                    session_id: &session_id,
                    channel: &channel,
                }),
            )
            .await;

        let mut assistant_turn =
            ConversationTurn::new(&session_id, Role::Assistant, &reply.text, &channel, "assistant");
        if let Some(model) = reply.model() {
            assistant_turn = assistant_turn.with_model(model);
        }
        if let Err(e) = self.context.save_turn(assistant_turn).await {
            error!(session = %session_id, "Failed to persist assistant turn: {e}");
            persisted = false;
        }

        let (chunks, delivered) = self.deliver(&message, &reply.text).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let mut record = AuditRecord::new(
            format!("{channel}:{sender}"),
            "message.routed",
            message.text().chars().take(AUDIT_RESOURCE_CHARS).collect::<String>(),
        )
        .on_channel(&channel)
        .with_detail(format!("latency={latency_ms}ms session={session_id}"));
        if !(persisted && delivered) || reply.is_exhausted() {
            record = record.failed();
        }
        self.audit.log(record);

        self.publish(DomainEvent::ResponseSent {
            channel: channel.clone(),
            session_id: session_id.clone(),
            chunks,
            latency_ms,
            timestamp: Utc::now(),
        });

        info!(
            channel = %channel,
            session = %session_id,
            latency_ms,
            chunks,
            model = reply.model().unwrap_or("none"),
            "Message routed"
        );

        reply.text
    }

    /// Push the response through the originating adapter, if connected.
    /// Returns (chunks sent, no delivery error).
    async fn deliver(&self, message: &NormalizedMessage, text: &str) -> (usize, bool) {
        let Some(adapter) = self.adapter(message.channel()) else {
            return (0, true);
        };
        if !adapter.is_connected() {
            return (0, true);
        }

        let mut sent = 0;
        for chunk in split_message(text, self.max_message_length(message.channel())) {
            let chunk = chunk.trim_end();
            if chunk.is_empty() {
                continue;
            }
            if let Err(e) = adapter.send_response(message, chunk).await {
                warn!(channel = %message.channel(), "Response delivery failed: {e}");
                return (sent, false);
            }
            sent += 1;
        }
        (sent, true)
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_message("hello", 10), vec!["hello"]);
        assert!(split_message("", 10).is_empty());
    }

    #[test]
    fn prefers_paragraph_breaks() {
        let text = "first paragraph.\n\nsecond one here";
        let chunks = split_message(text, 25);
        assert_eq!(chunks, vec!["first paragraph.\n\n", "second one here"]);
    }

    #[test]
    fn falls_back_to_line_then_sentence_then_space() {
        assert_eq!(split_message("aaaa\nbbbb cc", 8), vec!["aaaa\n", "bbbb cc"]);
        assert_eq!(
            split_message("One two. Three four", 12),
            vec!["One two. ", "Three four"]
        );
        assert_eq!(split_message("alpha beta gamma", 12), vec!["alpha beta ", "gamma"]);
    }

    #[test]
    fn hard_cut_without_separators() {
        let text = "x".repeat(25);
        let chunks = split_message(&text, 10);
        assert_eq!(chunks.iter().map(|c| c.len()).collect::<Vec<_>>(), vec![10, 10, 5]);
    }

    #[test]
    fn hard_cut_respects_char_boundaries() {
        let text = "é".repeat(5); // 10 bytes
        let chunks = split_message(&text, 3);
        assert!(chunks.iter().all(|c| c.len() <= 3));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn nine_thousand_chars_reassemble_losslessly() {
        let paragraph = format!("{}.\n\n", "word ".repeat(199).trim_end());
        let text = paragraph.repeat(10).chars().take(9000).collect::<String>();
        assert_eq!(text.len(), 9000);

        let chunks = split_message(&text, 4000);
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| c.len() <= 4000));
        assert_eq!(chunks.concat(), text);
    }
}
