//! In-memory backend: useful for testing and ephemeral sessions.
//!
//! Implements all three persistence traits (memory records, conversation
//! history, knowledge facts) over `RwLock`-guarded collections. Each trait
//! method takes the lock once, which gives the same row-level
//! last-write-wins behaviour as the SQLite backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use opsclaw_core::conversation::{ConversationStore, ConversationTurn};
use opsclaw_core::error::MemoryError;
use opsclaw_core::knowledge::{KnowledgeBase, KnowledgeFact, rank_facts};
use opsclaw_core::memory::{
    MemoryRecord, MemoryStats, MemoryStorage, PrunePolicy, PruneReport, SearchFilter,
    clamp_confidence,
};

use crate::vector;

/// Stores memories, turns and facts in process memory.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    records: Arc<RwLock<Vec<MemoryRecord>>>,
    turns: Arc<RwLock<HashMap<String, Vec<ConversationTurn>>>>,
    facts: Arc<RwLock<Vec<KnowledgeFact>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Lexical score: distinct terms present, then total occurrences.
fn lexical_score(content: &str, terms: &[String]) -> (usize, usize) {
    let lower = content.to_lowercase();
    terms.iter().fold((0, 0), |(distinct, total), term| {
        let n = lower.matches(term.as_str()).count();
        (distinct + usize::from(n > 0), total + n)
    })
}

#[async_trait]
impl MemoryStorage for InMemoryStorage {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn insert(&self, record: MemoryRecord) -> Result<(), MemoryError> {
        let mut records = self.records.write().await;
        if records.iter().any(|r| r.id == record.id) {
            return Err(MemoryError::Storage(format!("duplicate id {}", record.id)));
        }
        records.push(record);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>, MemoryError> {
        Ok(self.records.read().await.iter().find(|r| r.id == id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<bool, MemoryError> {
        let mut records = self.records.write().await;
        let len_before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() < len_before)
    }

    async fn keyword_search(
        &self,
        terms: &[String],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let records = self.records.read().await;
        let mut scored: Vec<((usize, usize), &MemoryRecord)> = records
            .iter()
            .filter(|r| filter.admits(r))
            .map(|r| (lexical_score(&r.content, terms), r))
            .filter(|(score, _)| score.0 > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        let records = self.records.read().await;
        Ok(vector::rank_by_similarity(
            records.iter(),
            embedding,
            filter,
            limit,
        ))
    }

    async fn record_access(&self, ids: &[String], at: DateTime<Utc>) -> Result<(), MemoryError> {
        let mut records = self.records.write().await;
        for record in records.iter_mut().filter(|r| ids.contains(&r.id)) {
            record.access_count += 1;
            record.last_accessed = Some(at);
        }
        Ok(())
    }

    async fn adjust_confidence(&self, id: &str, delta: f32) -> Result<Option<f32>, MemoryError> {
        let mut records = self.records.write().await;
        Ok(records.iter_mut().find(|r| r.id == id).map(|r| {
            r.confidence = clamp_confidence(r.confidence + delta);
            r.updated_at = Utc::now();
            r.confidence
        }))
    }

    async fn set_confidence(&self, id: &str, value: f32) -> Result<bool, MemoryError> {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.id == id) {
            Some(r) => {
                r.confidence = clamp_confidence(value);
                r.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_verified(&self, id: &str) -> Result<bool, MemoryError> {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.id == id) {
            Some(r) => {
                r.verified = true;
                r.confidence = 1.0;
                r.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn prune(&self, policy: &PrunePolicy, now: DateTime<Utc>) -> Result<PruneReport, MemoryError> {
        let mut records = self.records.write().await;
        let mut report = PruneReport::default();

        let before = records.len();
        records.retain(|r| !r.is_expired_at(now));
        report.expired_deleted = (before - records.len()) as u64;

        let stale_before = now - policy.decay_after;
        for r in records.iter_mut() {
            let last_touch = r.last_accessed.unwrap_or(r.created_at);
            if !r.verified && last_touch <= stale_before && r.confidence > policy.prune_below {
                r.confidence = clamp_confidence(r.confidence * policy.decay_factor);
                r.updated_at = now;
                report.decayed += 1;
            }
        }

        let old_before = now - policy.prune_after;
        let before = records.len();
        records.retain(|r| r.verified || r.confidence >= policy.prune_below || r.created_at > old_before);
        report.low_confidence_deleted = (before - records.len()) as u64;

        Ok(report)
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<MemoryStats, MemoryError> {
        let records = self.records.read().await;
        let soon = now + Duration::days(7);
        let mut stats = MemoryStats::default();
        let mut by_category: BTreeMap<String, u64> = BTreeMap::new();
        let mut confidence_sum = 0.0f64;

        for r in records.iter() {
            if r.is_expired_at(now) {
                stats.expired += 1;
                continue;
            }
            stats.total += 1;
            confidence_sum += r.confidence as f64;
            if r.verified {
                stats.verified += 1;
            }
            if r.embedding.is_some() {
                stats.with_embedding += 1;
            }
            if r.expires_at.is_some_and(|at| at <= soon) {
                stats.expiring_soon += 1;
            }
            *by_category.entry(r.category.to_string()).or_default() += 1;
        }

        if stats.total > 0 {
            stats.average_confidence = (confidence_sum / stats.total as f64) as f32;
        }
        stats.by_category = by_category;
        Ok(stats)
    }
}

#[async_trait]
impl ConversationStore for InMemoryStorage {
    async fn append(&self, turn: ConversationTurn) -> Result<(), MemoryError> {
        self.turns
            .write()
            .await
            .entry(turn.session_id.clone())
            .or_default()
            .push(turn);
        Ok(())
    }

    async fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<ConversationTurn>, MemoryError> {
        let turns = self.turns.read().await;
        Ok(turns
            .get(session_id)
            .map(|t| t.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl KnowledgeBase for InMemoryStorage {
    async fn upsert(&self, fact: KnowledgeFact) -> Result<(), MemoryError> {
        let mut facts = self.facts.write().await;
        match facts
            .iter_mut()
            .find(|f| f.domain == fact.domain && f.key == fact.key)
        {
            Some(existing) => *existing = fact,
            None => facts.push(fact),
        }
        Ok(())
    }

    async fn lookup(&self, query: &str, limit: usize) -> Result<Vec<KnowledgeFact>, MemoryError> {
        let facts = self.facts.read().await.clone();
        Ok(rank_facts(facts, query, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsclaw_core::memory::{MemoryCategory, NewMemory, query_terms};
    use opsclaw_core::message::Role;

    fn record(content: &str) -> MemoryRecord {
        MemoryRecord::from_new(NewMemory::new(content, MemoryCategory::Fact), 0.5, Utc::now())
    }

    #[tokio::test]
    async fn insert_get_delete() {
        let store = InMemoryStorage::new();
        let r = record("Production DB is PostgreSQL 16");
        let id = r.id.clone();
        store.insert(r).await.unwrap();

        assert!(store.get(&id).await.unwrap().is_some());
        assert!(store.delete(&id).await.unwrap());
        assert!(!store.delete(&id).await.unwrap());
        assert!(store.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn keyword_search_is_or_and_ranked() {
        let store = InMemoryStorage::new();
        store.insert(record("nginx serves the cards site")).await.unwrap();
        store.insert(record("redis backs the queue workers")).await.unwrap();
        store.insert(record("nginx restarts need redis flush")).await.unwrap();

        let terms = query_terms("nginx redis");
        let hits = store
            .keyword_search(&terms, &SearchFilter::new(Utc::now()), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].content, "nginx restarts need redis flush");
    }

    #[tokio::test]
    async fn keyword_search_excludes_expired_and_other_categories() {
        let store = InMemoryStorage::new();
        let now = Utc::now();
        let mut expired = record("nginx old note");
        expired.expires_at = Some(now - Duration::hours(1));
        let mut procedure = record("nginx reload procedure");
        procedure.category = MemoryCategory::Procedure;
        store.insert(expired).await.unwrap();
        store.insert(procedure).await.unwrap();
        store.insert(record("nginx fact")).await.unwrap();

        let terms = query_terms("nginx");
        let all = store
            .keyword_search(&terms, &SearchFilter::new(now), 10)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let filter = SearchFilter::new(now).with_category(Some(MemoryCategory::Procedure));
        let procedures = store.keyword_search(&terms, &filter, 10).await.unwrap();
        assert_eq!(procedures.len(), 1);
        assert_eq!(procedures[0].content, "nginx reload procedure");
    }

    #[tokio::test]
    async fn confidence_adjustments_clamp() {
        let store = InMemoryStorage::new();
        let r = record("x");
        let id = r.id.clone();
        store.insert(r).await.unwrap();

        assert_eq!(store.adjust_confidence(&id, 0.8).await.unwrap(), Some(1.0));
        assert_eq!(store.adjust_confidence(&id, -2.0).await.unwrap(), Some(0.0));
        assert!(store.set_confidence(&id, 7.0).await.unwrap());
        assert_eq!(store.get(&id).await.unwrap().unwrap().confidence, 1.0);
        assert_eq!(store.adjust_confidence("missing", 0.1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn prune_expires_decays_and_deletes() {
        let store = InMemoryStorage::new();
        let now = Utc::now();

        let mut expired = record("expired");
        expired.expires_at = Some(now - Duration::days(1));

        let mut stale = record("stale");
        stale.created_at = now - Duration::days(40);
        stale.confidence = 0.8;

        let mut doomed = record("doomed");
        doomed.created_at = now - Duration::days(100);
        doomed.confidence = 0.05;

        let mut verified = record("verified");
        verified.created_at = now - Duration::days(100);
        verified.confidence = 0.05;
        verified.verified = true;

        let fresh = record("fresh");
        let stale_id = stale.id.clone();
        let verified_id = verified.id.clone();
        for r in [expired, stale, doomed, verified, fresh] {
            store.insert(r).await.unwrap();
        }

        let report = store.prune(&PrunePolicy::default(), now).await.unwrap();
        assert_eq!(report.expired_deleted, 1);
        assert_eq!(report.decayed, 1);
        assert_eq!(report.low_confidence_deleted, 1);

        let stale = store.get(&stale_id).await.unwrap().unwrap();
        assert!((stale.confidence - 0.76).abs() < 1e-6);
        let verified = store.get(&verified_id).await.unwrap().unwrap();
        assert_eq!(verified.confidence, 0.05);
    }

    #[tokio::test]
    async fn stats_count_unexpired() {
        let store = InMemoryStorage::new();
        let now = Utc::now();
        let mut expired = record("old");
        expired.expires_at = Some(now - Duration::days(1));
        let mut soon = record("soon");
        soon.expires_at = Some(now + Duration::days(2));
        soon.embedding = Some(vec![1.0]);
        store.insert(expired).await.unwrap();
        store.insert(soon).await.unwrap();
        store.insert(record("plain")).await.unwrap();

        let stats = store.stats(now).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.expiring_soon, 1);
        assert_eq!(stats.with_embedding, 1);
        assert_eq!(stats.by_category.get("fact"), Some(&2));
        assert!((stats.average_confidence - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn recent_turns_are_newest_first() {
        let store = InMemoryStorage::new();
        for i in 0..5 {
            store
                .append(ConversationTurn::new("s1", Role::User, format!("m{i}"), "web", "u"))
                .await
                .unwrap();
        }
        store
            .append(ConversationTurn::new("s2", Role::User, "other", "web", "u"))
            .await
            .unwrap();

        let recent = store.recent("s1", 3).await.unwrap();
        let contents: Vec<&str> = recent.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["m4", "m3", "m2"]);
        assert!(store.recent("nobody", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn knowledge_upsert_replaces_same_key() {
        let store = InMemoryStorage::new();
        store
            .upsert(KnowledgeFact::new("server", "os", "Ubuntu 22.04", "agent"))
            .await
            .unwrap();
        store
            .upsert(KnowledgeFact::new("server", "os", "Ubuntu 24.04", "agent"))
            .await
            .unwrap();

        let facts = store.lookup("which os", 5).await.unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].value, "Ubuntu 24.04");
    }
}
