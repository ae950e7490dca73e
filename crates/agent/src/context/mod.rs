//! Prompt assembly under an estimated token budget.
//!
//! | Layer | Source | Included when |
//! |-------|--------|---------------|
//! | System | `system_prompt` config | Always |
//! | Relevant memory | `MemoryStore::search` | More than 500 tokens remain and the block fits |
//! | Infrastructure knowledge | `KnowledgeBase::lookup` | More than 300 tokens remain and the block fits |
//! | Conversation history | `ConversationStore::recent` | More than 500 tokens remain; oldest turns dropped first |
//! | User message | The request | Always, last |

pub mod assembler;
pub mod token;

pub use assembler::{AssembledContext, AssemblyMetadata, ContextAssembler, ContextSettings};
