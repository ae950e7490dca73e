//! Web channel adapter.
//!
//! Web messages arrive as HTTP requests rather than over a persistent
//! connection. The gateway hands the request body to
//! [`receive_message`](ChannelAdapter::receive_message), routes the result,
//! and collects what the router delivered with [`WebChannel::take_response`].

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use opsclaw_core::channel::{ChannelAdapter, NormalizedMessage};
use opsclaw_core::error::ChannelError;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Sender id for requests that carry no email.
const ANONYMOUS_SENDER: &str = "web_user";

/// Request/response web channel.
pub struct WebChannel {
    connected: AtomicBool,
    /// Delivered response text keyed by message id.
    pending: Mutex<HashMap<String, String>>,
    ready: Notify,
}

impl WebChannel {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            pending: Mutex::new(HashMap::new()),
            ready: Notify::new(),
        }
    }

    /// Wait up to `timeout` for the response to `message_id` and remove it.
    ///
    /// Chunks delivered for the same message are joined with a newline.
    pub async fn take_response(&self, message_id: &str, timeout: Duration) -> Option<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            // Register before checking so a delivery in between is not missed
            notified.as_mut().enable();

            if let Some(text) = self
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(message_id)
            {
                return Some(text);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                if !timeout.is_zero() {
                    warn!(message_id = %message_id, "Web response timeout");
                }
                return None;
            }
        }
    }

    /// Number of responses delivered but not yet taken.
    pub fn pending_responses(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for WebChannel {
    fn default() -> Self {
        Self::new()
    }
}

fn trimmed<'a>(raw: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    raw.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[async_trait]
impl ChannelAdapter for WebChannel {
    fn name(&self) -> &str {
        "web"
    }

    /// `{command | text, email?, name?, session_id?}`. Blank text is ignored.
    async fn receive_message(&self, raw: serde_json::Value) -> Option<NormalizedMessage> {
        let text = trimmed(&raw, "command").or_else(|| trimmed(&raw, "text"))?;
        let sender = trimmed(&raw, "email").unwrap_or(ANONYMOUS_SENDER);
        let name = trimmed(&raw, "name").unwrap_or(sender);

        let mut message = NormalizedMessage::new("web", sender, text).with_sender_name(name);
        if let Some(session_id) = trimmed(&raw, "session_id") {
            message = message.with_session_id(session_id);
        }
        Some(message.with_raw(raw))
    }

    async fn send_response(&self, message: &NormalizedMessage, text: &str) -> Result<(), ChannelError> {
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending
                .entry(message.id().to_string())
                .and_modify(|buffered| {
                    buffered.push('\n');
                    buffered.push_str(text);
                })
                .or_insert_with(|| text.to_string());
        }
        self.ready.notify_waiters();
        Ok(())
    }

    async fn connect(&self) -> Result<(), ChannelError> {
        self.connected.store(true, Ordering::SeqCst);
        info!("Web channel ready");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ChannelError> {
        self.connected.store(false, Ordering::SeqCst);
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn command_takes_precedence_over_text() {
        let ch = WebChannel::new();
        let msg = ch
            .receive_message(json!({
                "command": "  restart nginx ",
                "text": "ignored",
                "email": "ops@example.com",
                "name": "Ops"
            }))
            .await
            .unwrap();
        assert_eq!(msg.text(), "restart nginx");
        assert_eq!(msg.sender_id(), "ops@example.com");
        assert_eq!(msg.sender_name(), "Ops");
        assert_eq!(msg.channel(), "web");
        assert!(msg.session_id().is_none());
    }

    #[tokio::test]
    async fn defaults_and_explicit_session() {
        let ch = WebChannel::new();
        let msg = ch
            .receive_message(json!({"text": "hi", "session_id": "tab-1"}))
            .await
            .unwrap();
        assert_eq!(msg.sender_id(), "web_user");
        assert_eq!(msg.sender_name(), "web_user");
        assert_eq!(msg.session_id(), Some("tab-1"));
    }

    #[tokio::test]
    async fn blank_text_is_ignored() {
        let ch = WebChannel::new();
        assert!(ch.receive_message(json!({"command": "   "})).await.is_none());
        assert!(ch.receive_message(json!({"email": "a@b.c"})).await.is_none());
    }

    #[tokio::test]
    async fn chunks_are_buffered_until_taken() {
        let ch = WebChannel::new();
        let msg = NormalizedMessage::new("web", "u1", "hi");
        ch.send_response(&msg, "part one").await.unwrap();
        ch.send_response(&msg, "part two").await.unwrap();
        assert_eq!(ch.pending_responses(), 1);

        let text = ch.take_response(msg.id(), Duration::ZERO).await;
        assert_eq!(text.as_deref(), Some("part one\npart two"));
        assert_eq!(ch.pending_responses(), 0);
    }

    #[tokio::test]
    async fn waiter_wakes_on_delivery() {
        let ch = Arc::new(WebChannel::new());
        let msg = NormalizedMessage::new("web", "u1", "hi");
        let id = msg.id().to_string();

        let waiter = {
            let ch = ch.clone();
            tokio::spawn(async move { ch.take_response(&id, Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        ch.send_response(&msg, "done").await.unwrap();

        assert_eq!(waiter.await.unwrap().as_deref(), Some("done"));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_response_times_out() {
        let ch = WebChannel::new();
        assert!(ch.take_response("nope", Duration::from_secs(60)).await.is_none());
    }

    #[tokio::test]
    async fn lifecycle() {
        let ch = WebChannel::new();
        assert!(ch.is_connected());
        ch.disconnect().await.unwrap();
        assert!(!ch.is_connected());
        ch.connect().await.unwrap();
        assert!(ch.is_connected());
    }
}
