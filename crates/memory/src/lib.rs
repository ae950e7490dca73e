//! Memory system for OpsClaw: hybrid semantic + lexical retrieval.

pub mod embeddings;
pub mod in_memory;
pub mod manager;
pub mod vector;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use embeddings::NullEmbeddings;
pub use in_memory::InMemoryStorage;
pub use manager::{MemoryStore, MemoryStoreOptions, ScoredMemory, StoreOutcome};
pub use vector::{cosine_similarity, reciprocal_rank_fusion, FusedHit};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;
