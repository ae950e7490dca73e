//! Structured infrastructure knowledge.
//!
//! Facts are keyed by `(domain, key)` and populated by agents or operators,
//! e.g. `("server", "os") = "Ubuntu 22.04"`. The context assembler injects the
//! facts relevant to a prompt.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;
use crate::memory::query_terms;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeFact {
    /// e.g. "server", "database", "application", "network"
    pub domain: String,
    pub key: String,
    pub value: String,
    #[serde(default = "default_value_type")]
    pub value_type: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_verified: Option<DateTime<Utc>>,
}

fn default_value_type() -> String {
    "string".into()
}

impl KnowledgeFact {
    pub fn new(
        domain: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            key: key.into(),
            value: value.into(),
            value_type: default_value_type(),
            source: source.into(),
            last_verified: None,
        }
    }

    pub fn verified_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_verified = Some(at);
        self
    }

    /// Number of query terms that appear in the key or value.
    pub fn relevance(&self, terms: &[String]) -> usize {
        let haystack = format!("{} {}", self.key, self.value).to_lowercase();
        terms.iter().filter(|t| haystack.contains(t.as_str())).count()
    }

    /// `- [domain] key: value`
    pub fn render(&self) -> String {
        format!("- [{}] {}: {}", self.domain, self.key, self.value)
    }
}

/// Rank facts for a query: keyword overlap first, then most recently verified.
/// Facts with no overlap are dropped.
pub fn rank_facts(facts: Vec<KnowledgeFact>, query: &str, limit: usize) -> Vec<KnowledgeFact> {
    let terms = query_terms(query);
    if terms.is_empty() {
        return Vec::new();
    }
    let mut scored: Vec<(usize, KnowledgeFact)> = facts
        .into_iter()
        .map(|f| (f.relevance(&terms), f))
        .filter(|(score, _)| *score > 0)
        .collect();
    // Stable sort keeps insertion order for full ties.
    scored.sort_by(|(sa, fa), (sb, fb)| {
        sb.cmp(sa)
            .then_with(|| fb.last_verified.cmp(&fa.last_verified))
    });
    scored.into_iter().take(limit).map(|(_, f)| f).collect()
}

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Insert or replace the fact with the same `(domain, key)`.
    async fn upsert(&self, fact: KnowledgeFact) -> std::result::Result<(), MemoryError>;

    /// Facts relevant to `query`, best first.
    async fn lookup(
        &self,
        query: &str,
        limit: usize,
    ) -> std::result::Result<Vec<KnowledgeFact>, MemoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn ranks_by_overlap_then_recency() {
        let now = Utc::now();
        let facts = vec![
            KnowledgeFact::new("server", "hostname", "ops-vps", "agent"),
            KnowledgeFact::new("application", "nginx_version", "1.24", "agent")
                .verified_at(now - Duration::days(2)),
            KnowledgeFact::new("application", "nginx_config", "/etc/nginx/nginx.conf", "agent")
                .verified_at(now),
        ];
        let ranked = rank_facts(facts, "where is the nginx config", 5);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].key, "nginx_config");
        assert_eq!(ranked[1].key, "nginx_version");
    }

    #[test]
    fn empty_query_returns_nothing() {
        let facts = vec![KnowledgeFact::new("server", "os", "ubuntu", "agent")];
        assert!(rank_facts(facts, "?", 5).is_empty());
    }

    #[test]
    fn render_format() {
        let fact = KnowledgeFact::new("database", "engine", "PostgreSQL 16", "operator");
        assert_eq!(fact.render(), "- [database] engine: PostgreSQL 16");
    }
}
