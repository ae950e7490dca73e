//! Usage tracking collaborators.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opsclaw_core::ring::RingBuffer;

use crate::TelemetryError;
use crate::model::{UsageRecord, UsageSummary};

/// Records model-call usage. Callers treat failures as non-fatal.
#[async_trait]
pub trait UsageTracker: Send + Sync {
    async fn record(&self, record: UsageRecord) -> Result<(), TelemetryError>;

    /// Totals over everything currently retained.
    async fn summary(&self) -> Result<UsageSummary, TelemetryError>;
}

/// Keeps the most recent records in a bounded ring.
///
/// Thread-safe via `RwLock`.
pub struct InMemoryUsageTracker {
    records: RwLock<RingBuffer<UsageRecord>>,
}

impl InMemoryUsageTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RwLock::new(RingBuffer::new(capacity)),
        }
    }

    /// The newest `n` records, newest first.
    pub fn recent(&self, n: usize) -> Vec<UsageRecord> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .latest(n)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Totals for records with `from <= timestamp < to`.
    pub fn summary_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> UsageSummary {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        UsageSummary::from_records(
            records
                .iter()
                .filter(|r| r.timestamp >= from && r.timestamp < to),
        )
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryUsageTracker {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl UsageTracker for InMemoryUsageTracker {
    async fn record(&self, record: UsageRecord) -> Result<(), TelemetryError> {
        tracing::debug!(
            model = %record.model,
            tier = record.tier,
            tokens = record.total_tokens(),
            cost_usd = record.cost_usd,
            "Usage recorded"
        );
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
        Ok(())
    }

    async fn summary(&self) -> Result<UsageSummary, TelemetryError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(UsageSummary::from_records(records.iter()))
    }
}
