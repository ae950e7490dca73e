//! Domain event system: decoupled communication between bounded contexts.
//!
//! Events are published when something interesting happens in the system.
//! Live subscribers receive them over a broadcast channel; the last N are
//! also kept in a ring buffer for status endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use crate::ring::RingBuffer;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A message was accepted for routing
    MessageReceived {
        channel: String,
        sender_id: String,
        session_id: String,
        content_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// A routed message produced a response
    ResponseSent {
        channel: String,
        session_id: String,
        chunks: usize,
        latency_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A memory was stored, or merged into an existing near-duplicate
    MemoryStored {
        id: String,
        merged: bool,
        timestamp: DateTime<Utc>,
    },

    /// Every step of an approved plan has resolved
    PlanCompleted {
        command_id: String,
        steps: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::MessageReceived { timestamp, .. }
            | DomainEvent::ResponseSent { timestamp, .. }
            | DomainEvent::MemoryStored { timestamp, .. }
            | DomainEvent::PlanCompleted { timestamp, .. }
            | DomainEvent::ErrorOccurred { timestamp, .. } => *timestamp,
        }
    }

    /// Event name, matching the serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::MessageReceived { .. } => "message_received",
            DomainEvent::ResponseSent { .. } => "response_sent",
            DomainEvent::MemoryStored { .. } => "memory_stored",
            DomainEvent::PlanCompleted { .. } => "plan_completed",
            DomainEvent::ErrorOccurred { .. } => "error_occurred",
        }
    }
}

/// A broadcast-based event bus with a bounded recent-events history.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
    recent: Mutex<RingBuffer<Arc<DomainEvent>>>,
}

impl EventBus {
    /// `capacity` bounds both the broadcast queue and the history.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            recent: Mutex::new(RingBuffer::new(capacity)),
        }
    }

    /// Publish an event to all subscribers and remember it.
    pub fn publish(&self, event: DomainEvent) {
        let event = Arc::new(event);
        self.recent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        tracing::trace!(kind = event.kind(), "Event published");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }

    /// The newest `n` events, newest first.
    pub fn recent(&self, n: usize) -> Vec<Arc<DomainEvent>> {
        self.recent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .latest(n)
            .into_iter()
            .cloned()
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
