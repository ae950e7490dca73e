//! End-to-end routing through the orchestration core with an in-memory
//! store, a scripted model backend and a recording channel adapter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use opsclaw_agent::{
    BrainSettings, ContextAssembler, ContextSettings, MessageRouter, TieredBrain,
};
use opsclaw_config::ChannelConfig;
use opsclaw_core::channel::{ChannelAdapter, NormalizedMessage};
use opsclaw_core::conversation::ConversationStore;
use opsclaw_core::error::{ChannelError, ProviderError};
use opsclaw_core::event::{DomainEvent, EventBus};
use opsclaw_core::memory::{MemoryCategory, NewMemory};
use opsclaw_core::message::{Message, Role};
use opsclaw_core::provider::{CompletionRequest, CompletionResponse, ModelBackend, TokenUsage};
use opsclaw_memory::{InMemoryStorage, MemoryStore, MemoryStoreOptions, NullEmbeddings};
use opsclaw_security::AuditLogger;
use opsclaw_telemetry::InMemoryUsageTracker;

/// Always answers with `reply`, or fails when `reply` is `None`.
/// Keeps every prompt it saw.
struct ScriptedModel {
    reply: Option<String>,
    prompts: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    fn answering(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn failing() -> Self {
        Self {
            reply: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn last_prompt(&self) -> Vec<Message> {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ModelBackend for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        self.prompts.lock().unwrap().push(request.messages.clone());
        match &self.reply {
            Some(text) => Ok(CompletionResponse {
                text: text.clone(),
                usage: TokenUsage {
                    input_tokens: 120,
                    output_tokens: 30,
                },
                model: request.model,
            }),
            None => Err(ProviderError::Network("connection refused".into())),
        }
    }
}

/// Records delivered chunks.
struct RecordingChannel {
    name: &'static str,
    connected: AtomicBool,
    sent: Mutex<Vec<String>>,
}

impl RecordingChannel {
    fn new(name: &'static str, connected: bool) -> Self {
        Self {
            name,
            connected: AtomicBool::new(connected),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelAdapter for RecordingChannel {
    fn name(&self) -> &str {
        self.name
    }

    async fn receive_message(&self, raw: serde_json::Value) -> Option<NormalizedMessage> {
        let text = raw["text"].as_str()?;
        let sender = raw["sender"].as_str()?;
        Some(NormalizedMessage::new(self.name, sender, text))
    }

    async fn send_response(&self, _message: &NormalizedMessage, text: &str) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn connect(&self) -> Result<(), ChannelError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ChannelError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

struct Harness {
    router: MessageRouter,
    storage: InMemoryStorage,
    model: Arc<ScriptedModel>,
    audit: Arc<AuditLogger>,
    events: Arc<EventBus>,
    usage: Arc<InMemoryUsageTracker>,
}

fn harness(model: ScriptedModel, channels: HashMap<String, ChannelConfig>) -> Harness {
    let storage = InMemoryStorage::new();
    let events = Arc::new(EventBus::new(64));
    let memory = MemoryStore::new(
        Arc::new(storage.clone()),
        Arc::new(NullEmbeddings),
        MemoryStoreOptions::default(),
    )
    .with_events(events.clone());
    let context = Arc::new(ContextAssembler::new(
        memory,
        Arc::new(storage.clone()),
        Arc::new(storage.clone()),
        ContextSettings::default(),
    ));

    let model = Arc::new(model);
    let usage = Arc::new(InMemoryUsageTracker::new(64));
    let brain = Arc::new(
        TieredBrain::new(model.clone(), BrainSettings::default())
            .with_context(context.clone())
            .with_usage_tracker(usage.clone()),
    );
    let audit = Arc::new(AuditLogger::new(100));

    let router = MessageRouter::new(brain, context, audit.clone())
        .with_channel_config(channels)
        .with_events(events.clone());

    Harness {
        router,
        storage,
        model,
        audit,
        events,
        usage,
    }
}

fn restricted(channel: &str, allowed: &[&str]) -> HashMap<String, ChannelConfig> {
    HashMap::from([(
        channel.to_string(),
        ChannelConfig {
            allowed_users: allowed.iter().map(|s| s.to_string()).collect(),
            ..ChannelConfig::default()
        },
    )])
}

#[tokio::test]
async fn routed_message_is_persisted_delivered_and_audited() {
    let h = harness(ScriptedModel::answering("nginx is running"), HashMap::new());
    let telegram = Arc::new(RecordingChannel::new("telegram", true));
    h.router.register_adapter(telegram.clone());

    let message = NormalizedMessage::new("telegram", "alice", "status of nginx?");
    let session = opsclaw_core::session::derive_session_id("telegram", "alice");

    let response = h.router.route(message).await;
    assert_eq!(response, "nginx is running");
    assert_eq!(telegram.sent(), vec!["nginx is running"]);

    // User turn first, assistant turn after, both under the derived session
    let turns = h.storage.recent(&session, 10).await.unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, Role::Assistant);
    assert_eq!(turns[0].model.as_deref(), Some("ollama/qwen2.5:7b"));
    assert_eq!(turns[1].role, Role::User);
    assert_eq!(turns[1].content, "status of nginx?");

    let audit = h.audit.by_action("message.routed");
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].actor, "telegram:alice");
    assert!(audit[0].success);
    let detail = audit[0].detail.as_deref().unwrap();
    assert!(detail.starts_with("latency="));
    assert!(detail.ends_with(&format!("session={session}")));

    let kinds: Vec<&'static str> = h
        .events
        .recent(10)
        .iter()
        .map(|e| match e.as_ref() {
            DomainEvent::MessageReceived { .. } => "received",
            DomainEvent::ResponseSent { .. } => "sent",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, vec!["sent", "received"]);

    assert_eq!(h.usage.len(), 1);
}

#[tokio::test]
async fn unauthorized_sender_gets_nothing() {
    let h = harness(
        ScriptedModel::answering("secret"),
        restricted("telegram", &["bob"]),
    );
    let telegram = Arc::new(RecordingChannel::new("telegram", true));
    h.router.register_adapter(telegram.clone());

    let response = h
        .router
        .route(NormalizedMessage::new("telegram", "mallory", "dump the database"))
        .await;

    assert!(response.is_empty());
    assert!(telegram.sent().is_empty());
    let session = opsclaw_core::session::derive_session_id("telegram", "mallory");
    assert!(h.storage.recent(&session, 10).await.unwrap().is_empty());
    assert_eq!(h.audit.count(), 0);
    assert!(h.model.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn allowed_sender_on_restricted_channel_is_routed() {
    let h = harness(ScriptedModel::answering("hi bob"), restricted("telegram", &["bob"]));
    let response = h
        .router
        .route(NormalizedMessage::new("telegram", "bob", "hello"))
        .await;
    assert_eq!(response, "hi bob");
}

#[tokio::test]
async fn long_reply_is_chunked_in_reading_order() {
    let paragraph = format!("{}.\n\n", "check ".repeat(150).trim_end());
    let reply: String = paragraph.repeat(10).chars().take(9000).collect();
    let h = harness(ScriptedModel::answering(reply.clone()), HashMap::new());
    let telegram = Arc::new(RecordingChannel::new("telegram", true));
    h.router.register_adapter(telegram.clone());

    let response = h
        .router
        .route(NormalizedMessage::new("telegram", "alice", "show me everything"))
        .await;
    assert_eq!(response, reply);

    let sent = telegram.sent();
    assert!(sent.len() >= 3);
    assert!(sent.iter().all(|c| c.len() <= 4000));
    // Every delivered chunk is a contiguous piece of the reply, in order
    let mut cursor = 0;
    for chunk in &sent {
        let found = reply[cursor..].find(chunk.as_str()).unwrap();
        assert!(reply[cursor..cursor + found].trim().is_empty());
        cursor += found + chunk.len();
    }
    assert!(reply[cursor..].trim().is_empty());

    match h.events.recent(1)[0].as_ref() {
        DomainEvent::ResponseSent { chunks, .. } => assert_eq!(*chunks, sent.len()),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn disconnected_channel_still_returns_response() {
    let h = harness(ScriptedModel::answering("done"), HashMap::new());
    let web = Arc::new(RecordingChannel::new("web", false));
    h.router.register_adapter(web.clone());

    let response = h
        .router
        .route(NormalizedMessage::new("web", "alice@example.com", "check disk"))
        .await;
    assert_eq!(response, "done");
    assert!(web.sent().is_empty());
    assert_eq!(h.audit.count(), 1);

    let status = h.router.channel_status();
    assert_eq!(status.len(), 1);
    assert!(!status[0].connected);
}

#[tokio::test]
async fn exhausted_models_reply_with_unavailability_text() {
    let h = harness(ScriptedModel::failing(), HashMap::new());
    let response = h
        .router
        .route(NormalizedMessage::new("web", "alice", "plan a migration"))
        .await;

    assert_eq!(response, BrainSettings::default().unavailable_message);
    // Tier 3 down to tier 1: 2 + 2 + 1 candidates
    assert_eq!(h.model.prompts.lock().unwrap().len(), 5);
    let audit = h.audit.recent(1);
    assert_eq!(audit.len(), 1);
    assert!(!audit[0].success);
    assert_eq!(h.usage.len(), 0);
}

#[tokio::test]
async fn follow_up_sees_history_and_memory() {
    let h = harness(ScriptedModel::answering("noted"), HashMap::new());
    let memory = MemoryStore::new(
        Arc::new(h.storage.clone()),
        Arc::new(NullEmbeddings),
        MemoryStoreOptions::default(),
    );
    memory
        .store(NewMemory::new("postgres runs on port 5433", MemoryCategory::Fact).with_confidence(0.9))
        .await
        .unwrap();

    h.router
        .route(NormalizedMessage::new("cli", "ops", "remember the db"))
        .await;
    h.router
        .route(NormalizedMessage::new("cli", "ops", "which port does postgres use"))
        .await;

    let prompt = h.model.last_prompt();
    assert_eq!(prompt.first().unwrap().role, Role::System);
    assert_eq!(prompt.last().unwrap().content, "which port does postgres use");
    assert!(prompt
        .iter()
        .any(|m| m.content.contains("postgres runs on port 5433 (confidence: 90%)")));

    let history: Vec<&str> = prompt
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(
        history,
        vec!["remember the db", "noted", "which port does postgres use"]
    );
}
