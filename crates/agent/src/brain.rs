//! The tiered model brain.
//!
//! Selects a starting tier for a prompt, then walks an ordered failover
//! chain: every model of the selected tier in order, then every model of
//! each lower tier. The first success wins. When the chain is exhausted the
//! configured unavailability text is returned instead of an error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use opsclaw_config::{AppConfig, TierConfig};
use opsclaw_core::error::ProviderError;
use opsclaw_core::message::Message;
use opsclaw_core::provider::{CompletionRequest, CompletionResponse, ModelBackend};
use opsclaw_telemetry::{UsageRecord, UsageTracker};
use tracing::{debug, info, warn};

use crate::context::ContextAssembler;
use crate::tier::{select_tier, Complexity, TierThresholds};

/// Brain behavior, usually taken from `[brain]` and `system_prompt`.
#[derive(Debug, Clone)]
pub struct BrainSettings {
    /// Used when no context assembler is attached or no session is given.
    pub system_prompt: String,
    /// Sorted by level, cheapest first.
    pub tiers: Vec<TierConfig>,
    pub thresholds: TierThresholds,
    pub call_timeout: Duration,
    pub temperature: f32,
    pub unavailable_message: String,
}

impl BrainSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            system_prompt: config.system_prompt.clone(),
            tiers: config.sorted_tiers(),
            thresholds: TierThresholds {
                high_tokens: config.brain.high_token_threshold,
                simple_max_tokens: config.brain.simple_max_tokens,
            },
            call_timeout: Duration::from_secs(config.brain.call_timeout_secs),
            temperature: config.brain.temperature,
            unavailable_message: config.brain.unavailable_message.clone(),
        }
    }
}

impl Default for BrainSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// One entry of the failover chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub tier: u8,
    pub model: String,
    pub max_tokens: u32,
    pub cost_per_1k: f64,
}

/// A candidate that did not answer.
#[derive(Debug, Clone)]
pub struct FailedAttempt {
    pub tier: u8,
    pub model: String,
    pub error: ProviderError,
}

/// How the failover chain resolved.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Success {
        candidate: Candidate,
        response: CompletionResponse,
        latency_ms: u64,
        /// Candidates tried and failed before this one.
        failures: Vec<FailedAttempt>,
    },
    /// Every candidate in every tier failed.
    Exhausted { failures: Vec<FailedAttempt> },
}

impl AttemptOutcome {
    pub fn failures(&self) -> &[FailedAttempt] {
        match self {
            AttemptOutcome::Success { failures, .. } | AttemptOutcome::Exhausted { failures } => {
                failures
            }
        }
    }
}

/// A reply plus how it was produced.
#[derive(Debug, Clone)]
pub struct BrainReply {
    pub text: String,
    /// Level of the tier the chain started at.
    pub selected_tier: u8,
    pub outcome: AttemptOutcome,
}

impl BrainReply {
    pub fn is_exhausted(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Exhausted { .. })
    }

    /// Model id that answered, as configured (`provider/model`).
    pub fn model(&self) -> Option<&str> {
        match &self.outcome {
            AttemptOutcome::Success { candidate, .. } => Some(&candidate.model),
            AttemptOutcome::Exhausted { .. } => None,
        }
    }

    /// Level of the tier that answered.
    pub fn tier(&self) -> Option<u8> {
        match &self.outcome {
            AttemptOutcome::Success { candidate, .. } => Some(candidate.tier),
            AttemptOutcome::Exhausted { .. } => None,
        }
    }
}

/// Session the prompt belongs to, for context and usage attribution.
#[derive(Debug, Clone, Copy)]
pub struct SessionRef<'a> {
    pub session_id: &'a str,
    pub channel: &'a str,
}

/// Tier selection and failover over a single [`ModelBackend`].
///
/// The backend receives the configured `provider/model` identifier; in
/// production it is a `ProviderRouter`.
pub struct TieredBrain {
    backend: Arc<dyn ModelBackend>,
    settings: BrainSettings,
    context: Option<Arc<ContextAssembler>>,
    usage: Option<Arc<dyn UsageTracker>>,
}

impl TieredBrain {
    pub fn new(backend: Arc<dyn ModelBackend>, settings: BrainSettings) -> Self {
        Self {
            backend,
            settings,
            context: None,
            usage: None,
        }
    }

    /// Assemble session-aware prompts with this assembler.
    pub fn with_context(mut self, context: Arc<ContextAssembler>) -> Self {
        self.context = Some(context);
        self
    }

    /// Record usage for every successful call.
    pub fn with_usage_tracker(mut self, usage: Arc<dyn UsageTracker>) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn settings(&self) -> &BrainSettings {
        &self.settings
    }

    pub fn context(&self) -> Option<&Arc<ContextAssembler>> {
        self.context.as_ref()
    }

    /// Index into the sorted tiers where failover starts.
    pub fn select_tier(&self, prompt: &str, complexity: Complexity) -> usize {
        select_tier(
            &self.settings.tiers,
            prompt,
            complexity,
            self.settings.thresholds,
        )
    }

    /// The selected tier's models, then each lower tier's, in order.
    pub fn failover_chain(&self, start: usize) -> Vec<Candidate> {
        if start >= self.settings.tiers.len() {
            return Vec::new();
        }
        self.settings.tiers[..=start]
            .iter()
            .rev()
            .flat_map(|tier| {
                tier.models.iter().map(|model| Candidate {
                    tier: tier.level,
                    model: model.clone(),
                    max_tokens: tier.max_tokens,
                    cost_per_1k: tier.cost_per_1k,
                })
            })
            .collect()
    }

    /// Answer a prompt. Never fails: exhaustion yields the unavailability text.
    pub async fn think(
        &self,
        prompt: &str,
        complexity: Complexity,
        session: Option<SessionRef<'_>>,
    ) -> String {
        self.think_detailed(prompt, complexity, session).await.text
    }

    /// Like [`think`](Self::think), with the attempt record.
    pub async fn think_detailed(
        &self,
        prompt: &str,
        complexity: Complexity,
        session: Option<SessionRef<'_>>,
    ) -> BrainReply {
        let start = self.select_tier(prompt, complexity);
        let selected_tier = self
            .settings
            .tiers
            .get(start)
            .map(|t| t.level)
            .unwrap_or_default();
        debug!(tier = selected_tier, complexity = %complexity, "Tier selected");

        let messages = self.prompt_messages(prompt, session).await;
        let outcome = self.run_chain(self.failover_chain(start), messages).await;

        let text = match &outcome {
            AttemptOutcome::Success {
                candidate,
                response,
                latency_ms,
                ..
            } => {
                self.record_usage(candidate, response, *latency_ms, session)
                    .await;
                response.text.clone()
            }
            AttemptOutcome::Exhausted { failures } => {
                warn!(
                    attempts = failures.len(),
                    "All model candidates failed; returning unavailability message"
                );
                self.settings.unavailable_message.clone()
            }
        };

        BrainReply {
            text,
            selected_tier,
            outcome,
        }
    }

    async fn prompt_messages(&self, prompt: &str, session: Option<SessionRef<'_>>) -> Vec<Message> {
        match (&self.context, session) {
            (Some(context), Some(session)) => {
                context
                    .assemble(prompt, Some(session.session_id), session.channel)
                    .await
                    .messages
            }
            _ => vec![
                Message::system(self.settings.system_prompt.clone()),
                Message::user(prompt),
            ],
        }
    }

    async fn run_chain(&self, chain: Vec<Candidate>, messages: Vec<Message>) -> AttemptOutcome {
        let mut failures = Vec::new();

        for candidate in chain {
            let request = CompletionRequest {
                model: candidate.model.clone(),
                messages: messages.clone(),
                max_tokens: candidate.max_tokens,
                temperature: self.settings.temperature,
                timeout: self.settings.call_timeout,
            };

            let started = Instant::now();
            let result =
                match tokio::time::timeout(self.settings.call_timeout, self.backend.complete(request))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout(format!(
                        "{} did not answer within {}s",
                        candidate.model,
                        self.settings.call_timeout.as_secs()
                    ))),
                };
            let latency_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(response) => {
                    info!(
                        model = %candidate.model,
                        tier = candidate.tier,
                        latency_ms,
                        input_tokens = response.usage.input_tokens,
                        output_tokens = response.usage.output_tokens,
                        "Model answered"
                    );
                    return AttemptOutcome::Success {
                        candidate,
                        response,
                        latency_ms,
                        failures,
                    };
                }
                Err(error) => {
                    warn!(model = %candidate.model, tier = candidate.tier, "Model call failed: {error}");
                    failures.push(FailedAttempt {
                        tier: candidate.tier,
                        model: candidate.model,
                        error,
                    });
                }
            }
        }

        AttemptOutcome::Exhausted { failures }
    }

    async fn record_usage(
        &self,
        candidate: &Candidate,
        response: &CompletionResponse,
        latency_ms: u64,
        session: Option<SessionRef<'_>>,
    ) {
        let Some(usage) = &self.usage else {
            return;
        };
        let mut record = UsageRecord::new(
            candidate.model.clone(),
            candidate.tier,
            response.usage.input_tokens,
            response.usage.output_tokens,
            candidate.cost_per_1k,
            latency_ms,
        );
        if let Some(session) = session {
            record = record.with_session(session.session_id, session.channel);
        }
        if let Err(e) = usage.record(record).await {
            warn!(model = %candidate.model, "Usage tracking failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use opsclaw_core::provider::TokenUsage;
    use opsclaw_telemetry::{InMemoryUsageTracker, TelemetryError, UsageSummary};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Answers per model id; unknown models fail with a network error.
    struct Scripted {
        replies: HashMap<String, Result<String, ProviderError>>,
        delay: Option<(String, Duration)>,
        calls: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: &[(&str, Result<&str, ProviderError>)]) -> Self {
            Self {
                replies: replies
                    .iter()
                    .map(|(m, r)| (m.to_string(), r.clone().map(String::from)))
                    .collect(),
                delay: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelBackend for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, ProviderError> {
            self.calls.lock().unwrap().push(request.model.clone());
            if let Some((model, delay)) = &self.delay {
                if *model == request.model {
                    tokio::time::sleep(*delay).await;
                }
            }
            match self.replies.get(&request.model) {
                Some(Ok(text)) => Ok(CompletionResponse {
                    text: text.clone(),
                    usage: TokenUsage {
                        input_tokens: 600,
                        output_tokens: 400,
                    },
                    model: request.model,
                }),
                Some(Err(e)) => Err(e.clone()),
                None => Err(ProviderError::Network("connection refused".into())),
            }
        }
    }

    struct FailingTracker;

    #[async_trait]
    impl UsageTracker for FailingTracker {
        async fn record(&self, _record: UsageRecord) -> Result<(), TelemetryError> {
            Err(TelemetryError::Storage("disk full".into()))
        }
        async fn summary(&self) -> Result<UsageSummary, TelemetryError> {
            Err(TelemetryError::Storage("disk full".into()))
        }
    }

    fn brain(backend: Scripted) -> (TieredBrain, Arc<Scripted>) {
        let backend = Arc::new(backend);
        (TieredBrain::new(backend.clone(), BrainSettings::default()), backend)
    }

    #[test]
    fn chain_walks_down_from_selected_tier() {
        let (brain, _) = brain(Scripted::new(&[]));
        let models: Vec<String> = brain.failover_chain(2).into_iter().map(|c| c.model).collect();
        assert_eq!(
            models,
            vec![
                "openrouter/anthropic/claude-sonnet-4",
                "openai/gpt-4o",
                "openrouter/openai/gpt-4o-mini",
                "openai/gpt-4o-mini",
                "ollama/qwen2.5:7b",
            ]
        );
        assert_eq!(brain.failover_chain(0).len(), 1);
        assert!(brain.failover_chain(7).is_empty());
    }

    #[tokio::test]
    async fn first_candidate_answers() {
        let (brain, backend) = brain(Scripted::new(&[("ollama/qwen2.5:7b", Ok("nginx restarted"))]));
        let reply = brain.think_detailed("restart nginx", Complexity::Auto, None).await;
        assert_eq!(reply.text, "nginx restarted");
        assert_eq!(reply.selected_tier, 1);
        assert_eq!(reply.model(), Some("ollama/qwen2.5:7b"));
        assert_eq!(backend.calls(), vec!["ollama/qwen2.5:7b"]);
    }

    #[tokio::test]
    async fn falls_through_to_lower_tier() {
        let (brain, backend) = brain(Scripted::new(&[
            (
                "openrouter/anthropic/claude-sonnet-4",
                Err(ProviderError::RateLimited {
                    retry_after_secs: 5,
                }),
            ),
            ("openrouter/openai/gpt-4o-mini", Ok("mini answer")),
        ]));
        let reply = brain.think_detailed("hi", Complexity::High, None).await;
        assert_eq!(reply.text, "mini answer");
        assert_eq!(reply.tier(), Some(2));
        assert_eq!(reply.outcome.failures().len(), 2);
        assert_eq!(
            backend.calls(),
            vec![
                "openrouter/anthropic/claude-sonnet-4",
                "openai/gpt-4o",
                "openrouter/openai/gpt-4o-mini",
            ]
        );
    }

    #[tokio::test]
    async fn exhaustion_returns_unavailable_message() {
        let (brain, backend) = brain(Scripted::new(&[]));
        let reply = brain.think_detailed("hi", Complexity::High, None).await;
        assert!(reply.is_exhausted());
        assert_eq!(reply.text, BrainSettings::default().unavailable_message);
        assert_eq!(reply.outcome.failures().len(), 5);
        assert_eq!(backend.calls().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_model_times_out_and_fails_over() {
        let mut backend = Scripted::new(&[
            ("openrouter/openai/gpt-4o-mini", Ok("too late")),
            ("openai/gpt-4o-mini", Ok("fast")),
        ]);
        backend.delay = Some(("openrouter/openai/gpt-4o-mini".into(), Duration::from_secs(120)));
        let (brain, _) = brain(backend);

        let reply = brain
            .think_detailed("what's the weather like", Complexity::Auto, None)
            .await;
        assert_eq!(reply.text, "fast");
        assert!(matches!(
            reply.outcome.failures()[0].error,
            ProviderError::Timeout(_)
        ));
    }

    #[tokio::test]
    async fn usage_is_recorded_with_cost() {
        let tracker = Arc::new(InMemoryUsageTracker::new(16));
        let backend = Arc::new(Scripted::new(&[(
            "openrouter/anthropic/claude-sonnet-4",
            Ok("plan ready"),
        )]));
        let brain = TieredBrain::new(backend, BrainSettings::default())
            .with_usage_tracker(tracker.clone());

        brain
            .think(
                "plan the migration",
                Complexity::Auto,
                Some(SessionRef {
                    session_id: "s1",
                    channel: "web",
                }),
            )
            .await;

        let records = tracker.recent(1);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.tier, 3);
        assert_eq!(record.provider, "openrouter");
        assert_eq!(record.session_id.as_deref(), Some("s1"));
        // (600 + 400) / 1000 * 0.01
        assert!((record.cost_usd - 0.01).abs() < 1e-9);
    }

    #[tokio::test]
    async fn tracker_failure_does_not_affect_reply() {
        let backend = Arc::new(Scripted::new(&[("ollama/qwen2.5:7b", Ok("ok"))]));
        let brain = TieredBrain::new(backend, BrainSettings::default())
            .with_usage_tracker(Arc::new(FailingTracker));
        assert_eq!(brain.think("hi", Complexity::Low, None).await, "ok");
    }
}
