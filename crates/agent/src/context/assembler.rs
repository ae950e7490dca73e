//! Context assembly pipeline.
//!
//! Assembles a role-tagged prompt from five layers under an estimated token
//! budget:
//!
//! 1. **System** instructions. Always included, counted first.
//! 2. **Relevant memory** from the hybrid memory store.
//! 3. **Infrastructure knowledge** from the structured knowledge base.
//! 4. **Conversation history** for the session, newest kept first.
//! 5. **User message**. Always appended last, never trimmed.
//!
//! A layer that fails to load is skipped with a warning; assembly itself
//! never fails.

use std::sync::Arc;

use opsclaw_config::AppConfig;
use opsclaw_core::conversation::{ConversationStore, ConversationTurn};
use opsclaw_core::error::MemoryError;
use opsclaw_core::knowledge::KnowledgeBase;
use opsclaw_core::message::{Message, Role};
use opsclaw_memory::{MemoryStore, ScoredMemory};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::token;

/// Memory is only queried when more than this many tokens remain.
const MEMORY_MIN_REMAINING: usize = 500;
/// Knowledge is only queried when more than this many tokens remain.
const KNOWLEDGE_MIN_REMAINING: usize = 300;
/// History is only loaded when more than this many tokens remain.
const HISTORY_MIN_REMAINING: usize = 500;

/// Budget and layer limits.
#[derive(Debug, Clone)]
pub struct ContextSettings {
    pub system_prompt: String,
    /// Whole-prompt token budget.
    pub max_tokens: usize,
    /// Turns of history fetched per request.
    pub history_turns: usize,
    /// Tokens held back for the model's answer.
    pub response_reserve: usize,
    pub memory_limit: usize,
    pub knowledge_limit: usize,
}

impl ContextSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            system_prompt: config.system_prompt.clone(),
            max_tokens: config.context.max_tokens,
            history_turns: config.context.history_turns,
            response_reserve: config.context.response_reserve,
            memory_limit: config.context.memory_limit,
            knowledge_limit: config.context.knowledge_limit,
        }
    }
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// The assembled context, ready for a model call.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    /// System, memory, knowledge, history, then the user message.
    pub messages: Vec<Message>,
    pub metadata: AssemblyMetadata,
}

/// What went into the prompt and what was left out.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssemblyMetadata {
    /// Configured token budget.
    pub budget: usize,
    /// Estimated tokens of the assembled messages.
    pub total_tokens: usize,
    pub memories_included: usize,
    pub knowledge_included: usize,
    pub history_included: usize,
    /// History turns fetched before budget trimming.
    pub history_available: usize,
}

/// Builds prompts from memory, knowledge and session history.
pub struct ContextAssembler {
    memory: MemoryStore,
    history: Arc<dyn ConversationStore>,
    knowledge: Arc<dyn KnowledgeBase>,
    settings: ContextSettings,
}

impl ContextAssembler {
    pub fn new(
        memory: MemoryStore,
        history: Arc<dyn ConversationStore>,
        knowledge: Arc<dyn KnowledgeBase>,
        settings: ContextSettings,
    ) -> Self {
        Self {
            memory,
            history,
            knowledge,
            settings,
        }
    }

    pub fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn knowledge(&self) -> &Arc<dyn KnowledgeBase> {
        &self.knowledge
    }

    /// Append a turn to its session's history.
    pub async fn save_turn(&self, turn: ConversationTurn) -> Result<(), MemoryError> {
        self.history.append(turn).await
    }

    /// Most recent turns of a session, newest first.
    pub async fn history(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, MemoryError> {
        self.history.recent(session_id, limit).await
    }

    /// Assemble the prompt for `user_text`.
    ///
    /// Without a session id the history layer is skipped.
    pub async fn assemble(
        &self,
        user_text: &str,
        session_id: Option<&str>,
        channel: &str,
    ) -> AssembledContext {
        let system_tokens = token::estimate_tokens(&self.settings.system_prompt);
        let user_tokens = token::estimate_tokens(user_text);
        let mut remaining = self
            .settings
            .max_tokens
            .saturating_sub(system_tokens + user_tokens + self.settings.response_reserve);

        let mut metadata = AssemblyMetadata {
            budget: self.settings.max_tokens,
            ..Default::default()
        };
        let mut messages = vec![Message::system(self.settings.system_prompt.clone())];

        // ── Relevant memory ───────────────────────────────────────────────
        if remaining > MEMORY_MIN_REMAINING {
            match self
                .memory
                .search(user_text, self.settings.memory_limit, None, 0.0)
                .await
            {
                Ok(hits) if !hits.is_empty() => {
                    let block = render_memories(&hits);
                    let tokens = token::estimate_tokens(&block);
                    if tokens < remaining {
                        remaining -= tokens;
                        metadata.memories_included = hits.len();
                        messages.push(Message::system(block));
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(channel = %channel, "Memory recall failed: {e}"),
            }
        }

        // ── Infrastructure knowledge ──────────────────────────────────────
        if remaining > KNOWLEDGE_MIN_REMAINING {
            match self
                .knowledge
                .lookup(user_text, self.settings.knowledge_limit)
                .await
            {
                Ok(facts) if !facts.is_empty() => {
                    let lines: Vec<String> = facts.iter().map(|f| f.render()).collect();
                    let block = format!("Infrastructure context:\n{}", lines.join("\n"));
                    let tokens = token::estimate_tokens(&block);
                    if tokens < remaining {
                        remaining -= tokens;
                        metadata.knowledge_included = facts.len();
                        messages.push(Message::system(block));
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(channel = %channel, "Knowledge lookup failed: {e}"),
            }
        }

        // ── Conversation history ──────────────────────────────────────────
        if let Some(session_id) = session_id {
            if remaining > HISTORY_MIN_REMAINING {
                match self
                    .history
                    .recent(session_id, self.settings.history_turns)
                    .await
                {
                    Ok(turns) => {
                        let window = fit_history(turns, user_text, remaining);
                        metadata.history_available = window.available;
                        metadata.history_included = window.messages.len();
                        messages.extend(window.messages);
                    }
                    Err(e) => {
                        warn!(session = %session_id, "History load failed: {e}");
                    }
                }
            }
        }

        messages.push(Message::user(user_text));
        metadata.total_tokens = token::estimate_messages_tokens(&messages);

        debug!(
            channel = %channel,
            tokens = metadata.total_tokens,
            memories = metadata.memories_included,
            knowledge = metadata.knowledge_included,
            history = metadata.history_included,
            "Context assembled"
        );

        AssembledContext { messages, metadata }
    }
}

/// `- content (confidence: NN%)` under a heading.
fn render_memories(hits: &[ScoredMemory]) -> String {
    let mut block = String::from("Relevant knowledge from memory:");
    for hit in hits {
        block.push_str("\n- ");
        block.push_str(&hit.record.content);
        if hit.record.confidence > 0.0 {
            let pct = (hit.record.confidence * 100.0).round() as u32;
            block.push_str(&format!(" (confidence: {pct}%)"));
        }
    }
    block
}

struct HistoryWindow {
    messages: Vec<Message>,
    available: usize,
}

/// Keep the newest turns that fit `budget`, returned in chronological order.
///
/// The router persists the user turn before the brain runs, so a newest turn
/// identical to the current user message is not repeated.
fn fit_history(newest_first: Vec<ConversationTurn>, user_text: &str, budget: usize) -> HistoryWindow {
    let mut turns = newest_first.into_iter().peekable();
    if turns
        .peek()
        .is_some_and(|t| t.role == Role::User && t.content == user_text)
    {
        turns.next();
    }
    let turns: Vec<ConversationTurn> = turns.collect();
    let available = turns.len();

    let mut remaining = budget;
    let mut kept = Vec::new();
    for turn in turns {
        let tokens = token::estimate_tokens(&turn.content);
        if tokens >= remaining {
            break;
        }
        remaining -= tokens;
        kept.push(Message {
            role: turn.role,
            content: turn.content,
        });
    }
    kept.reverse();

    HistoryWindow {
        messages: kept,
        available,
    }
}
