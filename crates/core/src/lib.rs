//! # OpsClaw Core
//!
//! Domain types, traits, and error definitions for the OpsClaw agent
//! orchestration core. This crate has **no framework dependencies**: it
//! defines the domain model that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the orchestration pipeline is a trait here:
//! channel adapters, model backends, embedding providers, memory storage,
//! conversation history and the knowledge base. Implementations live in
//! their respective crates and are wired together explicitly at startup.

pub mod error;
pub mod message;
pub mod session;
pub mod channel;
pub mod provider;
pub mod memory;
pub mod conversation;
pub mod knowledge;
pub mod ring;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{ChannelError, Error, MemoryError, ProviderError, Result};
pub use message::{Message, Role};
pub use session::derive_session_id;
pub use channel::{ChannelAdapter, MediaAttachment, MediaKind, NormalizedMessage};
pub use provider::{
    CompletionRequest, CompletionResponse, EmbeddingProvider, ModelBackend, TokenUsage,
};
pub use memory::{
    MemoryCategory, MemoryRecord, MemoryStats, MemoryStorage, NewMemory, PrunePolicy,
    PruneReport, SearchFilter,
};
pub use conversation::{ConversationStore, ConversationTurn};
pub use knowledge::{KnowledgeBase, KnowledgeFact};
pub use ring::RingBuffer;
pub use event::{DomainEvent, EventBus};
