//! LLM provider implementations for OpsClaw.
//!
//! All providers implement `opsclaw_core::ModelBackend`.
//! The router selects the correct provider from the `provider/model` prefix.

pub mod openai_compat;
pub mod router;

pub use openai_compat::{OpenAiCompatProvider, OpenAiEmbeddings};
pub use router::{ProviderRouter, build_from_config, embeddings_from_config, split_model_id};
