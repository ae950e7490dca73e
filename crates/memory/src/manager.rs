//! Hybrid memory store: semantic + lexical retrieval merged with RRF.
//!
//! Search runs both rankings (each over-fetching `limit * 2`), fuses them
//! with Reciprocal Rank Fusion, filters by confidence and truncates. When
//! no embedding provider is available, or embedding the query fails, the
//! lexical ranking alone is used.
//!
//! Storing first looks for a near-duplicate: if the best fused score for
//! the new content exceeds `duplicate_threshold`, the existing record's
//! confidence is bumped instead of inserting.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use opsclaw_core::error::MemoryError;
use opsclaw_core::event::{DomainEvent, EventBus};
use opsclaw_core::memory::{
    MemoryCategory, MemoryRecord, MemoryStats, MemoryStorage, NewMemory, PrunePolicy, PruneReport,
    SearchFilter, query_terms,
};
use opsclaw_core::provider::EmbeddingProvider;

use crate::vector::{self, DEFAULT_RRF_K};

/// Confidence added when a near-duplicate is re-stored.
pub const DUPLICATE_CONFIDENCE_BUMP: f32 = 0.1;

/// Tunables for [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryStoreOptions {
    /// Fused score above which a new memory is treated as a re-confirmation.
    /// One list contributes at most `1/(k+1)`, so only content found by both
    /// rankings can cross the default.
    pub duplicate_threshold: f64,
    pub rrf_k: f64,
    pub default_confidence: f32,
    pub prune_policy: PrunePolicy,
}

impl Default for MemoryStoreOptions {
    fn default() -> Self {
        Self {
            duplicate_threshold: 0.03,
            rrf_k: DEFAULT_RRF_K,
            default_confidence: 0.5,
            prune_policy: PrunePolicy::default(),
        }
    }
}

/// A search hit with its fused relevance score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredMemory {
    #[serde(flatten)]
    pub record: MemoryRecord,
    pub score: f64,
}

/// Result of a store request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreOutcome {
    pub id: String,
    /// True when the content matched an existing record, which was bumped
    pub merged: bool,
}

/// The memory store facade used by the agent, gateway and CLI.
#[derive(Clone)]
pub struct MemoryStore {
    storage: Arc<dyn MemoryStorage>,
    embeddings: Arc<dyn EmbeddingProvider>,
    options: MemoryStoreOptions,
    events: Option<Arc<EventBus>>,
}

impl MemoryStore {
    pub fn new(
        storage: Arc<dyn MemoryStorage>,
        embeddings: Arc<dyn EmbeddingProvider>,
        options: MemoryStoreOptions,
    ) -> Self {
        Self {
            storage,
            embeddings,
            options,
            events: None,
        }
    }

    /// Publish `MemoryStored` events on this bus.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn storage(&self) -> &Arc<dyn MemoryStorage> {
        &self.storage
    }

    pub fn options(&self) -> &MemoryStoreOptions {
        &self.options
    }

    /// Whether semantic ranking will be attempted.
    pub fn has_vectors(&self) -> bool {
        self.embeddings.is_available()
    }

    /// Hybrid search. Returned records have their access tracked.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        category: Option<MemoryCategory>,
        min_confidence: f32,
    ) -> Result<Vec<ScoredMemory>, MemoryError> {
        let mut hits = self.ranked(query, limit, category, min_confidence).await?;
        if hits.is_empty() {
            return Ok(hits);
        }

        let now = Utc::now();
        let ids: Vec<String> = hits.iter().map(|h| h.record.id.clone()).collect();
        match self.storage.record_access(&ids, now).await {
            Ok(()) => {
                for hit in &mut hits {
                    hit.record.access_count += 1;
                    hit.record.last_accessed = Some(now);
                }
            }
            Err(e) => warn!("Memory access tracking failed: {e}"),
        }
        Ok(hits)
    }

    async fn ranked(
        &self,
        query: &str,
        limit: usize,
        category: Option<MemoryCategory>,
        min_confidence: f32,
    ) -> Result<Vec<ScoredMemory>, MemoryError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let filter = SearchFilter::new(Utc::now()).with_category(category);
        let fetch = limit.saturating_mul(2);

        let semantic = if self.embeddings.is_available() {
            match self.semantic_search(query, &filter, fetch).await {
                Ok(records) => records,
                Err(e) => {
                    warn!("Vector search failed, using lexical only: {e}");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let terms = query_terms(query);
        let lexical = self.storage.keyword_search(&terms, &filter, fetch).await?;

        let lists = [
            semantic.iter().map(|r| r.id.clone()).collect::<Vec<_>>(),
            lexical.iter().map(|r| r.id.clone()).collect::<Vec<_>>(),
        ];
        let fused = vector::reciprocal_rank_fusion(&lists, self.options.rrf_k);

        let mut by_id: HashMap<String, MemoryRecord> = HashMap::new();
        for record in semantic.into_iter().chain(lexical) {
            by_id.entry(record.id.clone()).or_insert(record);
        }

        let mut results = Vec::with_capacity(limit);
        for hit in fused {
            let Some(record) = by_id.remove(&hit.id) else {
                continue;
            };
            if record.confidence < min_confidence {
                continue;
            }
            results.push(ScoredMemory {
                record,
                score: hit.score,
            });
            if results.len() == limit {
                break;
            }
        }

        debug!(query, hits = results.len(), "Memory search");
        Ok(results)
    }

    async fn semantic_search(
        &self,
        query: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        let embedding = self
            .embeddings
            .embed(query)
            .await
            .map_err(|e| MemoryError::QueryFailed(e.to_string()))?;
        self.storage.vector_search(&embedding, filter, limit).await
    }

    /// Store a memory, or bump the confidence of a near-duplicate.
    pub async fn store(&self, new: NewMemory) -> Result<StoreOutcome, MemoryError> {
        if new.content.trim().is_empty() {
            return Err(MemoryError::Storage("cannot store empty content".into()));
        }

        let existing = self.ranked(&new.content, 1, None, 0.0).await?;
        if let Some(top) = existing.first() {
            if top.score > self.options.duplicate_threshold {
                let id = top.record.id.clone();
                self.storage
                    .adjust_confidence(&id, DUPLICATE_CONFIDENCE_BUMP)
                    .await?;
                if let Err(e) = self.storage.record_access(&[id.clone()], Utc::now()).await {
                    warn!("Memory access tracking failed: {e}");
                }
                info!(id = %id, score = top.score, "Memory near-duplicate detected, bumped confidence");
                self.publish(&id, true);
                return Ok(StoreOutcome { id, merged: true });
            }
        }

        let mut record =
            MemoryRecord::from_new(new, self.options.default_confidence, Utc::now());

        if self.embeddings.is_available() {
            match self.embeddings.embed(&record.content).await {
                Ok(embedding) => record.embedding = Some(embedding),
                Err(e) => warn!("Failed to generate embedding: {e}"),
            }
        }

        let id = record.id.clone();
        let preview: String = record.content.chars().take(80).collect();
        info!(id = %id, category = %record.category, "Stored memory: {preview}");
        self.storage.insert(record).await?;
        self.publish(&id, false);
        Ok(StoreOutcome { id, merged: false })
    }

    /// Store several memories in order. Each entry is deduplicated
    /// against everything stored before it, including earlier entries.
    pub async fn store_batch(&self, batch: Vec<NewMemory>) -> Result<Vec<StoreOutcome>, MemoryError> {
        let mut outcomes = Vec::with_capacity(batch.len());
        for new in batch {
            outcomes.push(self.store(new).await?);
        }
        Ok(outcomes)
    }

    pub async fn get(&self, id: &str) -> Result<Option<MemoryRecord>, MemoryError> {
        self.storage.get(id).await
    }

    /// Overwrite a record's confidence. Fails with `NotFound` for unknown ids.
    pub async fn update_confidence(&self, id: &str, confidence: f32) -> Result<(), MemoryError> {
        if self.storage.set_confidence(id, confidence).await? {
            Ok(())
        } else {
            Err(MemoryError::NotFound(id.to_string()))
        }
    }

    /// Mark a record operator-verified: full confidence, exempt from pruning.
    pub async fn verify(&self, id: &str) -> Result<(), MemoryError> {
        if self.storage.mark_verified(id).await? {
            info!(id, "Memory verified");
            Ok(())
        } else {
            Err(MemoryError::NotFound(id.to_string()))
        }
    }

    pub async fn delete(&self, id: &str) -> Result<bool, MemoryError> {
        self.storage.delete(id).await
    }

    /// Expire, decay and prune according to the configured policy.
    pub async fn prune(&self) -> Result<PruneReport, MemoryError> {
        let report = self
            .storage
            .prune(&self.options.prune_policy, Utc::now())
            .await?;
        info!(
            expired = report.expired_deleted,
            decayed = report.decayed,
            deleted = report.low_confidence_deleted,
            "Memory prune complete"
        );
        Ok(report)
    }

    pub async fn stats(&self) -> Result<MemoryStats, MemoryError> {
        self.storage.stats(Utc::now()).await
    }

    fn publish(&self, id: &str, merged: bool) {
        if let Some(events) = &self.events {
            events.publish(DomainEvent::MemoryStored {
                id: id.to_string(),
                merged,
                timestamp: Utc::now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::NullEmbeddings;
    use crate::in_memory::InMemoryStorage;
    use async_trait::async_trait;
    use opsclaw_core::error::ProviderError;

    /// Bag-of-words hashing embedder: shared words give similar vectors.
    struct HashedWords;

    #[async_trait]
    impl EmbeddingProvider for HashedWords {
        fn name(&self) -> &str {
            "hashed"
        }
        fn is_available(&self) -> bool {
            true
        }
        fn dimensions(&self) -> usize {
            16
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; 16];
                    for term in query_terms(t) {
                        let slot = term.bytes().map(|b| b as usize).sum::<usize>() % 16;
                        v[slot] += 1.0;
                    }
                    v
                })
                .collect())
        }
    }

    struct Broken;

    #[async_trait]
    impl EmbeddingProvider for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn is_available(&self) -> bool {
            true
        }
        fn dimensions(&self) -> usize {
            16
        }
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            Err(ProviderError::Network("connection refused".into()))
        }
    }

    fn store_with(embeddings: Arc<dyn EmbeddingProvider>) -> (MemoryStore, InMemoryStorage) {
        let storage = InMemoryStorage::new();
        let store = MemoryStore::new(
            Arc::new(storage.clone()),
            embeddings,
            MemoryStoreOptions::default(),
        );
        (store, storage)
    }

    fn fact(content: &str) -> NewMemory {
        NewMemory::new(content, MemoryCategory::Fact)
    }

    #[tokio::test]
    async fn lexical_only_without_embeddings() {
        let (store, _) = store_with(Arc::new(NullEmbeddings));
        store.store(fact("The server IP address is 10.0.0.5")).await.unwrap();
        store.store(fact("Backups run nightly at 02:00")).await.unwrap();

        let hits = store.search("server address", 5, None, 0.0).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 1.0 / 61.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn embedding_failure_degrades_to_lexical() {
        let (store, _) = store_with(Arc::new(Broken));
        let outcome = store.store(fact("redis runs on port 6379")).await.unwrap();
        assert!(!outcome.merged);

        let stored = store.get(&outcome.id).await.unwrap().unwrap();
        assert!(stored.embedding.is_none());

        let hits = store.search("redis port", 5, None, 0.0).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    /// Delegates to an in-memory store, but the vector index is down.
    struct NoVectorIndex(InMemoryStorage);

    #[async_trait]
    impl MemoryStorage for NoVectorIndex {
        fn name(&self) -> &str {
            "no_vector_index"
        }
        async fn insert(&self, record: MemoryRecord) -> Result<(), MemoryError> {
            self.0.insert(record).await
        }
        async fn get(&self, id: &str) -> Result<Option<MemoryRecord>, MemoryError> {
            self.0.get(id).await
        }
        async fn delete(&self, id: &str) -> Result<bool, MemoryError> {
            self.0.delete(id).await
        }
        async fn keyword_search(
            &self,
            terms: &[String],
            filter: &SearchFilter,
            limit: usize,
        ) -> Result<Vec<MemoryRecord>, MemoryError> {
            self.0.keyword_search(terms, filter, limit).await
        }
        async fn vector_search(
            &self,
            _embedding: &[f32],
            _filter: &SearchFilter,
            _limit: usize,
        ) -> Result<Vec<MemoryRecord>, MemoryError> {
            Err(MemoryError::QueryFailed("vector index down".into()))
        }
        async fn record_access(&self, ids: &[String], at: chrono::DateTime<Utc>) -> Result<(), MemoryError> {
            self.0.record_access(ids, at).await
        }
        async fn adjust_confidence(&self, id: &str, delta: f32) -> Result<Option<f32>, MemoryError> {
            self.0.adjust_confidence(id, delta).await
        }
        async fn set_confidence(&self, id: &str, value: f32) -> Result<bool, MemoryError> {
            self.0.set_confidence(id, value).await
        }
        async fn mark_verified(&self, id: &str) -> Result<bool, MemoryError> {
            self.0.mark_verified(id).await
        }
        async fn prune(&self, policy: &PrunePolicy, now: chrono::DateTime<Utc>) -> Result<PruneReport, MemoryError> {
            self.0.prune(policy, now).await
        }
        async fn stats(&self, now: chrono::DateTime<Utc>) -> Result<MemoryStats, MemoryError> {
            self.0.stats(now).await
        }
    }

    #[tokio::test]
    async fn vector_search_failure_degrades_to_lexical() {
        let storage = InMemoryStorage::new();
        let store = MemoryStore::new(
            Arc::new(NoVectorIndex(storage.clone())),
            Arc::new(HashedWords),
            MemoryStoreOptions::default(),
        );

        let outcome = store.store(fact("nginx serves the dashboard")).await.unwrap();
        assert!(!outcome.merged);
        assert!(storage.get(&outcome.id).await.unwrap().unwrap().embedding.is_some());

        let hits = store.search("nginx", 5, None, 0.0).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, outcome.id);
        assert!((hits[0].score - 1.0 / 61.0).abs() < 1e-12);

        // Lexical-only scores stay under the threshold, so the repeat is a new record
        let again = store.store(fact("nginx serves the dashboard")).await.unwrap();
        assert!(!again.merged);
    }

    #[tokio::test]
    async fn hybrid_hit_outranks_single_list_hit() {
        let (store, _) = store_with(Arc::new(HashedWords));
        store.store(fact("nginx serves the dashboard")).await.unwrap();
        store.store(fact("postgres holds the orders")).await.unwrap();

        let hits = store.search("nginx dashboard", 5, None, 0.0).await.unwrap();
        assert_eq!(hits[0].record.content, "nginx serves the dashboard");
        assert!(hits[0].score > 1.0 / 61.0);
    }

    #[tokio::test]
    async fn duplicate_bumps_confidence_instead_of_inserting() {
        let (store, storage) = store_with(Arc::new(HashedWords));
        let first = store.store(fact("nginx listens on port 443")).await.unwrap();
        let second = store.store(fact("nginx listens on port 443")).await.unwrap();

        assert!(second.merged);
        assert_eq!(second.id, first.id);
        let record = storage.get(&first.id).await.unwrap().unwrap();
        assert!((record.confidence - 0.6).abs() < 1e-6);
        assert_eq!(store.stats().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn bump_is_capped_at_one() {
        let (store, storage) = store_with(Arc::new(HashedWords));
        let first = store
            .store(fact("disk is /dev/sda").with_confidence(0.95))
            .await
            .unwrap();
        store.store(fact("disk is /dev/sda")).await.unwrap();
        let record = storage.get(&first.id).await.unwrap().unwrap();
        assert_eq!(record.confidence, 1.0);
    }

    #[tokio::test]
    async fn without_embeddings_nothing_merges() {
        let (store, _) = store_with(Arc::new(NullEmbeddings));
        let a = store.store(fact("swap is disabled")).await.unwrap();
        let b = store.store(fact("swap is disabled")).await.unwrap();
        assert_ne!(a.id, b.id);
        assert!(!b.merged);
    }

    #[tokio::test]
    async fn min_confidence_and_limit_apply_after_fusion() {
        let (store, _) = store_with(Arc::new(NullEmbeddings));
        store.store(fact("cron job one").with_confidence(0.2)).await.unwrap();
        store.store(fact("cron job two").with_confidence(0.9)).await.unwrap();
        store.store(fact("cron job three").with_confidence(0.8)).await.unwrap();

        let hits = store.search("cron", 5, None, 0.5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.record.confidence >= 0.5));

        let one = store.search("cron", 1, None, 0.0).await.unwrap();
        assert_eq!(one.len(), 1);

        assert!(store.search("cron", 0, None, 0.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_tracks_access() {
        let (store, storage) = store_with(Arc::new(NullEmbeddings));
        let out = store.store(fact("grafana on port 3000")).await.unwrap();

        let hits = store.search("grafana", 5, None, 0.0).await.unwrap();
        assert_eq!(hits[0].record.access_count, 1);
        store.search("grafana", 5, None, 0.0).await.unwrap();

        let record = storage.get(&out.id).await.unwrap().unwrap();
        assert_eq!(record.access_count, 2);
        assert!(record.last_accessed.is_some());
    }

    #[tokio::test]
    async fn category_filter_restricts_results() {
        let (store, _) = store_with(Arc::new(NullEmbeddings));
        store.store(fact("deploy via docker compose")).await.unwrap();
        store
            .store(NewMemory::new("deploy only on weekdays", MemoryCategory::Preference))
            .await
            .unwrap();

        let hits = store
            .search("deploy", 5, Some(MemoryCategory::Preference), 0.0)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.category, MemoryCategory::Preference);
    }

    #[tokio::test]
    async fn verify_update_delete() {
        let (store, _) = store_with(Arc::new(NullEmbeddings));
        let out = store.store(fact("ssh on port 2222")).await.unwrap();

        store.update_confidence(&out.id, 0.3).await.unwrap();
        assert!((store.get(&out.id).await.unwrap().unwrap().confidence - 0.3).abs() < 1e-6);

        store.verify(&out.id).await.unwrap();
        let record = store.get(&out.id).await.unwrap().unwrap();
        assert!(record.verified);
        assert_eq!(record.confidence, 1.0);

        assert!(matches!(
            store.verify("missing").await,
            Err(MemoryError::NotFound(_))
        ));
        assert!(store.delete(&out.id).await.unwrap());
        assert!(!store.delete(&out.id).await.unwrap());
    }

    #[tokio::test]
    async fn empty_content_is_rejected() {
        let (store, _) = store_with(Arc::new(NullEmbeddings));
        assert!(store.store(fact("   ")).await.is_err());
    }

    #[tokio::test]
    async fn store_publishes_events() {
        let bus = Arc::new(EventBus::new(8));
        let (store, _) = store_with(Arc::new(HashedWords));
        let store = store.with_events(bus.clone());

        store.store(fact("traefik routes the api")).await.unwrap();
        store.store(fact("traefik routes the api")).await.unwrap();

        let recent = bus.recent(2);
        assert!(matches!(*recent[0], DomainEvent::MemoryStored { merged: true, .. }));
        assert!(matches!(*recent[1], DomainEvent::MemoryStored { merged: false, .. }));
    }

    #[tokio::test]
    async fn batch_deduplicates_within_itself() {
        let (store, _) = store_with(Arc::new(HashedWords));
        let outcomes = store
            .store_batch(vec![fact("uptime kuma watches sites"), fact("uptime kuma watches sites")])
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[1].merged);
    }
}
