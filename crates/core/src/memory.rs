//! Memory records and the storage trait behind the hybrid memory store.
//!
//! The storage layer is deliberately dumb: key lookup, lexical ranking,
//! vector ranking, and single-statement updates. Fusion, deduplication
//! and degradation policy live in `opsclaw-memory`'s `MemoryStore`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MemoryError;

/// What kind of knowledge a record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryCategory {
    Fact,
    Preference,
    Procedure,
    Observation,
}

impl MemoryCategory {
    pub const ALL: [MemoryCategory; 4] = [
        MemoryCategory::Fact,
        MemoryCategory::Preference,
        MemoryCategory::Procedure,
        MemoryCategory::Observation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryCategory::Fact => "fact",
            MemoryCategory::Preference => "preference",
            MemoryCategory::Procedure => "procedure",
            MemoryCategory::Observation => "observation",
        }
    }
}

impl std::fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryCategory {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fact" => Ok(MemoryCategory::Fact),
            "preference" => Ok(MemoryCategory::Preference),
            "procedure" => Ok(MemoryCategory::Procedure),
            "observation" => Ok(MemoryCategory::Observation),
            other => Err(MemoryError::QueryFailed(format!(
                "unknown memory category '{other}'"
            ))),
        }
    }
}

/// Clamp a confidence value into `[0.0, 1.0]`. NaN becomes 0.
pub fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// A single long-term memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,

    pub category: MemoryCategory,

    pub content: String,

    /// Where this came from (channel, agent, operator)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Always within [0, 1]
    pub confidence: f32,

    /// Verified records never decay and are never pruned
    #[serde(default)]
    pub verified: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub access_count: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Embedding vector (stored as blob in DB)
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl MemoryRecord {
    /// Build a fresh record from a store request.
    pub fn from_new(new: NewMemory, default_confidence: f32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            category: new.category,
            content: new.content,
            source: new.source,
            confidence: clamp_confidence(new.confidence.unwrap_or(default_confidence)),
            verified: false,
            expires_at: new.expires_at,
            access_count: 0,
            last_accessed: None,
            created_at: now,
            updated_at: now,
            embedding: None,
            metadata: new.metadata,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A request to remember something.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMemory {
    pub content: String,

    #[serde(default = "default_category")]
    pub category: MemoryCategory,

    #[serde(default)]
    pub source: Option<String>,

    /// Defaults to the store's configured default when absent
    #[serde(default)]
    pub confidence: Option<f32>,

    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

fn default_category() -> MemoryCategory {
    MemoryCategory::Fact
}

impl NewMemory {
    pub fn new(content: impl Into<String>, category: MemoryCategory) -> Self {
        Self {
            content: content.into(),
            category,
            source: None,
            confidence: None,
            expires_at: None,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Restrictions applied inside the storage ranking queries.
///
/// Expired records (relative to `now`) are always excluded.
#[derive(Debug, Clone)]
pub struct SearchFilter {
    pub category: Option<MemoryCategory>,
    pub now: DateTime<Utc>,
}

impl SearchFilter {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            category: None,
            now,
        }
    }

    pub fn with_category(mut self, category: Option<MemoryCategory>) -> Self {
        self.category = category;
        self
    }

    pub fn admits(&self, record: &MemoryRecord) -> bool {
        !record.is_expired_at(self.now) && self.category.is_none_or(|c| c == record.category)
    }
}

/// Thresholds for the decay-and-prune maintenance pass.
#[derive(Debug, Clone)]
pub struct PrunePolicy {
    /// Confidence multiplier for stale unverified records
    pub decay_factor: f32,

    /// A record is stale once unaccessed for this long
    pub decay_after: Duration,

    /// Unverified records below this confidence are deletion candidates
    pub prune_below: f32,

    /// ...once they are at least this old
    pub prune_after: Duration,
}

impl Default for PrunePolicy {
    fn default() -> Self {
        Self {
            decay_factor: 0.95,
            decay_after: Duration::days(30),
            prune_below: 0.1,
            prune_after: Duration::days(90),
        }
    }
}

/// Counts produced by one prune pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneReport {
    pub expired_deleted: u64,
    pub decayed: u64,
    pub low_confidence_deleted: u64,
}

/// Summary of the memory store contents.
///
/// Everything except `expired` counts unexpired records only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total: u64,
    pub verified: u64,
    pub expired: u64,
    /// Expiring within the next 7 days
    pub expiring_soon: u64,
    pub with_embedding: u64,
    pub average_confidence: f32,
    pub by_category: BTreeMap<String, u64>,
}

/// Split a query into lowercase search terms longer than one character.
///
/// Shared by the lexical ranking of every backend and by knowledge lookup.
pub fn query_terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        if word.chars().count() <= 1 {
            continue;
        }
        let word = word.to_lowercase();
        if !terms.contains(&word) {
            terms.push(word);
        }
    }
    terms
}

/// Persistence behind the memory store.
///
/// Every mutating method is a single atomic update; there are no
/// multi-step client-side transactions, so concurrent callers see
/// last-write-wins at the row level.
///
/// Implementations: SQLite (FTS5 + in-process cosine), in-memory.
#[async_trait]
pub trait MemoryStorage: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    async fn insert(&self, record: MemoryRecord) -> std::result::Result<(), MemoryError>;

    async fn get(&self, id: &str) -> std::result::Result<Option<MemoryRecord>, MemoryError>;

    async fn delete(&self, id: &str) -> std::result::Result<bool, MemoryError>;

    /// Lexical ranking, best first. A record matches if it contains ANY term.
    async fn keyword_search(
        &self,
        terms: &[String],
        filter: &SearchFilter,
        limit: usize,
    ) -> std::result::Result<Vec<MemoryRecord>, MemoryError>;

    /// Similarity ranking over records that carry an embedding, best first.
    async fn vector_search(
        &self,
        embedding: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> std::result::Result<Vec<MemoryRecord>, MemoryError>;

    /// Increment access_count and set last_accessed for each id.
    async fn record_access(
        &self,
        ids: &[String],
        at: DateTime<Utc>,
    ) -> std::result::Result<(), MemoryError>;

    /// Add `delta` to a record's confidence, clamped. Returns the new value.
    async fn adjust_confidence(
        &self,
        id: &str,
        delta: f32,
    ) -> std::result::Result<Option<f32>, MemoryError>;

    /// Overwrite confidence (clamped). Returns whether the record exists.
    async fn set_confidence(&self, id: &str, value: f32) -> std::result::Result<bool, MemoryError>;

    /// Mark verified with full confidence. Returns whether the record exists.
    async fn mark_verified(&self, id: &str) -> std::result::Result<bool, MemoryError>;

    async fn prune(
        &self,
        policy: &PrunePolicy,
        now: DateTime<Utc>,
    ) -> std::result::Result<PruneReport, MemoryError>;

    async fn stats(&self, now: DateTime<Utc>) -> std::result::Result<MemoryStats, MemoryError>;
}
