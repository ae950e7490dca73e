//! Data model for model-call usage records and cost summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Usage record ──────────────────────────────────────────────────────────

/// One completed model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    /// Full "provider/model" identifier.
    pub model: String,
    /// The provider prefix of `model`.
    pub provider: String,
    /// Tier level the call was made at.
    pub tier: u8,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Estimated cost in USD.
    pub cost_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub latency_ms: u64,
}

impl UsageRecord {
    /// Build a record, deriving the provider and the cost.
    pub fn new(
        model: impl Into<String>,
        tier: u8,
        input_tokens: u32,
        output_tokens: u32,
        cost_per_1k: f64,
        latency_ms: u64,
    ) -> Self {
        let model = model.into();
        Self {
            timestamp: Utc::now(),
            provider: provider_of(&model).to_string(),
            model,
            tier,
            input_tokens,
            output_tokens,
            cost_usd: estimate_cost(input_tokens, output_tokens, cost_per_1k),
            session_id: None,
            channel: None,
            latency_ms,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>, channel: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self.channel = Some(channel.into());
        self
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens as u64 + self.output_tokens as u64
    }
}

/// The provider prefix of a "provider/model" identifier.
pub fn provider_of(model: &str) -> &str {
    model.split_once('/').map_or(model, |(provider, _)| provider)
}

/// `(input + output) / 1000 * cost_per_1k`.
pub fn estimate_cost(input_tokens: u32, output_tokens: u32, cost_per_1k: f64) -> f64 {
    (input_tokens as f64 + output_tokens as f64) / 1000.0 * cost_per_1k
}

// ── Summary ───────────────────────────────────────────────────────────────

/// Per-model totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub model: String,
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

/// Aggregated usage, with a per-model breakdown sorted by cost (highest first).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSummary {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost_usd: f64,
    pub by_model: Vec<ModelUsage>,
}

impl UsageSummary {
    /// Summarize a set of records.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a UsageRecord>) -> Self {
        let mut summary = UsageSummary::default();
        let mut by_model: std::collections::HashMap<&str, ModelUsage> =
            std::collections::HashMap::new();

        for r in records {
            summary.calls += 1;
            summary.input_tokens += r.input_tokens as u64;
            summary.output_tokens += r.output_tokens as u64;
            summary.total_cost_usd += r.cost_usd;

            let entry = by_model.entry(r.model.as_str()).or_insert_with(|| ModelUsage {
                model: r.model.clone(),
                ..Default::default()
            });
            entry.calls += 1;
            entry.input_tokens += r.input_tokens as u64;
            entry.output_tokens += r.output_tokens as u64;
            entry.cost_usd += r.cost_usd;
        }

        summary.by_model = by_model.into_values().collect();
        summary.by_model.sort_by(|a, b| {
            b.cost_usd
                .partial_cmp(&a.cost_usd)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.model.cmp(&b.model))
        });
        summary
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}
