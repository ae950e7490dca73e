//! Model and embedding collaborator traits.
//!
//! A [`ModelBackend`] takes a model identifier and a role-tagged prompt and
//! returns generated text plus token usage. An [`EmbeddingProvider`] turns
//! text into fixed-dimension vectors, or reports that none are available.
//!
//! Implementations: OpenAI-compatible HTTP endpoints (OpenAI, OpenRouter,
//! Ollama, custom), and scripted backends in tests.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Message;

/// One completion call against one model.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// The model to use, usually "provider/model" (e.g., "ollama/qwen2.5:7b")
    pub model: String,

    /// The ordered prompt
    pub messages: Vec<Message>,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    pub temperature: f32,

    /// Upper bound on the whole call
    pub timeout: Duration,
}

/// Token usage reported by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// A complete response from a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub text: String,

    pub usage: TokenUsage,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// The core model inference trait.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Backend name (e.g., "openai", "router").
    fn name(&self) -> &str;

    /// Generate a completion. Transport and provider failures are errors;
    /// the caller decides whether to fail over.
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<CompletionResponse, ProviderError>;
}

/// Text to vector conversion.
///
/// Absence of a provider is a normal state: `is_available()` returns
/// `false` and callers fall back to lexical search.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this provider can produce vectors at all.
    fn is_available(&self) -> bool;

    /// Dimension of every returned vector.
    fn dimensions(&self) -> usize;

    /// Embed a batch, one vector per input in input order.
    async fn embed_batch(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| ProviderError::InvalidResponse("empty embedding batch".into()))
    }
}
