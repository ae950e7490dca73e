//! Embedding fallbacks.
//!
//! HTTP embedding providers live in `opsclaw-providers`; this module only
//! carries the "no vectors configured" provider so the memory store can run
//! lexical-only without any network dependency.

use async_trait::async_trait;
use opsclaw_core::error::ProviderError;
use opsclaw_core::provider::EmbeddingProvider;

/// Reports itself unavailable; every embed call fails with `NotConfigured`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEmbeddings;

#[async_trait]
impl EmbeddingProvider for NullEmbeddings {
    fn name(&self) -> &str {
        "none"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn dimensions(&self) -> usize {
        0
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Err(ProviderError::NotConfigured("no embedding provider configured".into()))
    }
}
