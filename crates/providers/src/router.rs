//! Provider router: dispatches `provider/model` identifiers to backends.
//!
//! Handles provider creation from config and routing requests to the right
//! backend. The router is itself a [`ModelBackend`], so the brain sees one
//! collaborator regardless of how many providers are configured.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use opsclaw_config::AppConfig;
use opsclaw_core::error::ProviderError;
use opsclaw_core::provider::{CompletionRequest, CompletionResponse, ModelBackend};
use tracing::debug;

use crate::openai_compat::{OpenAiCompatProvider, OpenAiEmbeddings};

/// Routes LLM requests to the correct provider.
#[derive(Default)]
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn ModelBackend>>,
}

/// Split "openrouter/anthropic/claude-sonnet-4" into
/// ("openrouter", "anthropic/claude-sonnet-4"). Only the first '/' counts.
pub fn split_model_id(model_id: &str) -> Option<(&str, &str)> {
    let (provider, model) = model_id.split_once('/')?;
    if provider.is_empty() || model.is_empty() {
        return None;
    }
    Some((provider, model))
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn ModelBackend>) {
        self.providers.insert(name.into(), provider);
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ModelBackend>> {
        self.providers.get(name).cloned()
    }

    /// Resolve a model identifier to (backend, provider-local model name).
    pub fn resolve(&self, model_id: &str) -> Result<(Arc<dyn ModelBackend>, String), ProviderError> {
        let (provider, model) = split_model_id(model_id).ok_or_else(|| {
            ProviderError::ModelNotFound(format!("expected provider/model, got '{model_id}'"))
        })?;
        let backend = self
            .get(provider)
            .ok_or_else(|| ProviderError::NotConfigured(provider.to_string()))?;
        Ok((backend, model.to_string()))
    }

    /// List all registered provider names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl ModelBackend for ProviderRouter {
    fn name(&self) -> &str {
        "router"
    }

    async fn complete(
        &self,
        mut request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let (backend, model) = self.resolve(&request.model)?;
        debug!(provider = backend.name(), model = %model, "Routing completion");
        request.model = model;
        backend.complete(request).await
    }
}

/// Build a provider from config, falling back to well-known defaults.
fn build_provider(config: &AppConfig, name: &str) -> OpenAiCompatProvider {
    let provider_config = config.providers.get(name);
    let api_key = provider_config
        .and_then(|p| p.api_key.clone())
        .or_else(|| config.api_key.clone())
        .unwrap_or_default();
    let base_url = provider_config
        .and_then(|p| p.api_url.clone())
        .unwrap_or_else(|| default_base_url(name));
    OpenAiCompatProvider::new(name, base_url, api_key)
}

/// Build providers from configuration.
///
/// Every explicitly configured provider is registered, plus every provider
/// prefix referenced by a tier model so defaults work without a
/// `[providers]` section.
pub fn build_from_config(config: &AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new();

    let referenced = config
        .brain
        .tiers
        .iter()
        .flat_map(|t| t.models.iter())
        .filter_map(|m| split_model_id(m).map(|(p, _)| p.to_string()));

    for name in config.providers.keys().cloned().chain(referenced) {
        if router.get(&name).is_none() {
            let provider = build_provider(config, &name);
            router.register(name, Arc::new(provider));
        }
    }

    router
}

/// Build the configured embedder, or `None` when embeddings are disabled.
pub fn embeddings_from_config(config: &AppConfig) -> Option<OpenAiEmbeddings> {
    let provider = config.memory.embedding_provider.trim();
    if provider.is_empty() || provider == "none" {
        return None;
    }
    Some(OpenAiEmbeddings::new(
        Arc::new(build_provider(config, provider)),
        Some(config.memory.embedding_model.clone()),
        config.memory.embedding_dimensions,
    ))
}

/// Get the default base URL for well-known providers.
pub fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "anthropic" => "https://api.anthropic.com/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsclaw_core::message::Message;
    use opsclaw_core::provider::TokenUsage;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Recording {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ModelBackend for Recording {
        fn name(&self) -> &str {
            "recording"
        }
        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, ProviderError> {
            self.seen.lock().unwrap().push(request.model.clone());
            Ok(CompletionResponse {
                text: "ok".into(),
                usage: TokenUsage::default(),
                model: request.model,
            })
        }
    }

    fn request(model: &str) -> CompletionRequest {
        CompletionRequest {
            model: model.into(),
            messages: vec![Message::user("hi")],
            max_tokens: 16,
            temperature: 0.3,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn split_on_first_slash_only() {
        assert_eq!(
            split_model_id("openrouter/anthropic/claude-sonnet-4"),
            Some(("openrouter", "anthropic/claude-sonnet-4"))
        );
        assert_eq!(split_model_id("ollama/qwen2.5:7b"), Some(("ollama", "qwen2.5:7b")));
        assert_eq!(split_model_id("gpt-4o"), None);
        assert_eq!(split_model_id("/gpt-4o"), None);
    }

    #[tokio::test]
    async fn routes_by_prefix_and_strips_it() {
        let backend = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
        });
        let mut router = ProviderRouter::new();
        router.register("openrouter", backend.clone());

        let resp = router
            .complete(request("openrouter/openai/gpt-4o-mini"))
            .await
            .unwrap();
        assert_eq!(resp.text, "ok");
        assert_eq!(backend.seen.lock().unwrap().as_slice(), ["openai/gpt-4o-mini"]);
    }

    #[tokio::test]
    async fn unknown_provider_is_not_configured() {
        let router = ProviderRouter::new();
        assert!(matches!(
            router.complete(request("nowhere/model")).await,
            Err(ProviderError::NotConfigured(_))
        ));
        assert!(matches!(
            router.complete(request("bare-model")).await,
            Err(ProviderError::ModelNotFound(_))
        ));
    }

    #[test]
    fn default_base_urls() {
        assert!(default_base_url("openrouter").contains("openrouter.ai"));
        assert!(default_base_url("openai").contains("api.openai.com"));
        assert!(default_base_url("ollama").contains("localhost:11434"));
    }

    #[test]
    fn build_from_default_config_covers_tier_providers() {
        let config = AppConfig::default();
        let router = build_from_config(&config);
        assert_eq!(router.list(), vec!["ollama", "openai", "openrouter"]);
    }

    #[test]
    fn embeddings_follow_config() {
        let mut config = AppConfig::default();
        assert!(embeddings_from_config(&config).is_none());

        config.memory.embedding_provider = "ollama".into();
        let embedder = embeddings_from_config(&config).unwrap();
        use opsclaw_core::provider::EmbeddingProvider;
        assert!(embedder.is_available());
        assert_eq!(embedder.dimensions(), 768);
    }
}
