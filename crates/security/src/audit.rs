//! Audit logging: structured records of what the agent did and for whom.
//!
//! The logger keeps the most recent records in a ring buffer for status
//! endpoints and forwards every record to its sinks.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use opsclaw_core::ring::RingBuffer;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single audit log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Who triggered it, e.g. "telegram:12345" or "operator"
    pub actor: String,
    /// What happened, e.g. "message.routed", "command.approved"
    pub action: String,
    /// What it happened to (session id, command id, memory id)
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub success: bool,
}

impl AuditRecord {
    pub fn new(actor: impl Into<String>, action: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            actor: actor.into(),
            action: action.into(),
            resource: resource.into(),
            channel: None,
            detail: None,
            success: true,
        }
    }

    pub fn on_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }
}

/// Error returned by a sink that could not persist a record.
#[derive(Debug, thiserror::Error)]
#[error("audit sink failed: {0}")]
pub struct AuditSinkError(pub String);

/// Trait for audit log sinks (where records are written).
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditSinkError>;
}

/// In-memory audit logger backed by a bounded ring buffer.
pub struct AuditLogger {
    records: Mutex<RingBuffer<AuditRecord>>,
    sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("record_count", &self.count())
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl AuditLogger {
    /// Create a new audit logger with no sinks.
    pub fn new(capacity: usize) -> Self {
        Self::with_sinks(capacity, Vec::new())
    }

    /// Create a new audit logger with the given sinks.
    pub fn with_sinks(capacity: usize, sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self {
            records: Mutex::new(RingBuffer::new(capacity)),
            sinks,
        }
    }

    /// Record an audit entry. Sink failures are logged, never propagated.
    pub fn log(&self, record: AuditRecord) {
        for sink in &self.sinks {
            if let Err(e) = sink.record(&record) {
                tracing::warn!(action = %record.action, "{e}");
            }
        }

        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }

    /// The newest `n` records, newest first.
    pub fn recent(&self, n: usize) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .latest(n)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Records for one action, oldest first.
    pub fn by_action(&self, action: &str) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.action == action)
            .cloned()
            .collect()
    }

    /// Count of stored records.
    pub fn count(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn clear(&self) {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// A tracing-based audit sink that logs records via `tracing::info!`.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditSinkError> {
        tracing::info!(
            target: "audit",
            actor = %record.actor,
            action = %record.action,
            resource = %record.resource,
            channel = ?record.channel,
            detail = ?record.detail,
            success = record.success,
            "AUDIT"
        );
        Ok(())
    }
}
