//! Wiring of the orchestration core from configuration.
//!
//! Builds every shared component exactly once. The HTTP gateway and the
//! CLI both run on a [`Runtime`].

use std::sync::Arc;

use opsclaw_agent::{
    BrainSettings, CommandRegistry, CommandRunner, ContextAssembler, ContextSettings,
    MessageRouter, PlanExecutor, ShellRunner, TieredBrain,
};
use opsclaw_channels::WebChannel;
use opsclaw_config::AppConfig;
use opsclaw_core::conversation::ConversationStore;
use opsclaw_core::error::MemoryError;
use opsclaw_core::event::EventBus;
use opsclaw_core::knowledge::KnowledgeBase;
use opsclaw_core::memory::MemoryStorage;
use opsclaw_core::provider::{EmbeddingProvider, ModelBackend};
use opsclaw_memory::{InMemoryStorage, MemoryStore, MemoryStoreOptions, NullEmbeddings, SqliteStorage};
use opsclaw_security::{AuditLogger, AuditSink, TracingSink};
use opsclaw_telemetry::InMemoryUsageTracker;
use tracing::info;

/// Usage records kept in memory.
const USAGE_CAPACITY: usize = 10_000;
/// Domain events kept for `GET /v1/events`.
const EVENT_CAPACITY: usize = 256;

/// The three persistence roles, usually backed by one storage engine.
#[derive(Clone)]
pub struct Stores {
    pub memory: Arc<dyn MemoryStorage>,
    pub history: Arc<dyn ConversationStore>,
    pub knowledge: Arc<dyn KnowledgeBase>,
}

impl Stores {
    pub fn in_memory() -> Self {
        let storage = InMemoryStorage::new();
        Self {
            memory: Arc::new(storage.clone()),
            history: Arc::new(storage.clone()),
            knowledge: Arc::new(storage),
        }
    }

    pub async fn sqlite(path: &str) -> Result<Self, MemoryError> {
        let storage = SqliteStorage::new(path).await?;
        Ok(Self {
            memory: Arc::new(storage.clone()),
            history: Arc::new(storage.clone()),
            knowledge: Arc::new(storage),
        })
    }

    /// Select the backend named by `memory.backend`.
    pub async fn from_config(config: &AppConfig) -> Result<Self, MemoryError> {
        match config.memory.backend.as_str() {
            "memory" => Ok(Self::in_memory()),
            _ => {
                let path = config.memory.resolved_db_path();
                if let Some(dir) = path.parent() {
                    std::fs::create_dir_all(dir)
                        .map_err(|e| MemoryError::Storage(format!("{}: {e}", dir.display())))?;
                }
                Self::sqlite(&path.to_string_lossy()).await
            }
        }
    }
}

/// Shared components of a running OpsClaw instance.
pub struct Runtime {
    pub config: AppConfig,
    pub context: Arc<ContextAssembler>,
    pub brain: Arc<TieredBrain>,
    pub router: Arc<MessageRouter>,
    pub web: Arc<WebChannel>,
    pub commands: Arc<CommandRegistry>,
    pub executor: Arc<PlanExecutor>,
    pub usage: Arc<InMemoryUsageTracker>,
    pub audit: Arc<AuditLogger>,
    pub events: Arc<EventBus>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl Runtime {
    /// Build from configuration: storage backend, provider router,
    /// embeddings and the shell command runner.
    pub async fn build(config: AppConfig) -> Result<Self, MemoryError> {
        let stores = Stores::from_config(&config).await?;
        let backend = Arc::new(opsclaw_providers::build_from_config(&config));
        let embeddings: Arc<dyn EmbeddingProvider> =
            match opsclaw_providers::embeddings_from_config(&config) {
                Some(embedder) => Arc::new(embedder),
                None => Arc::new(NullEmbeddings),
            };

        info!(
            backend = %config.memory.backend,
            embeddings = embeddings.is_available(),
            "Runtime storage ready"
        );
        Ok(Self::from_parts(
            config,
            backend,
            embeddings,
            stores,
            Arc::new(ShellRunner),
        ))
    }

    /// Assemble a runtime from explicit collaborators.
    pub fn from_parts(
        config: AppConfig,
        backend: Arc<dyn ModelBackend>,
        embeddings: Arc<dyn EmbeddingProvider>,
        stores: Stores,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let events = Arc::new(EventBus::new(EVENT_CAPACITY));
        let usage = Arc::new(InMemoryUsageTracker::new(USAGE_CAPACITY));
        let audit = Arc::new(AuditLogger::with_sinks(
            config.audit.capacity,
            vec![Box::new(TracingSink) as Box<dyn AuditSink>],
        ));

        let options = MemoryStoreOptions {
            duplicate_threshold: config.memory.duplicate_threshold,
            rrf_k: config.memory.rrf_k,
            default_confidence: config.memory.default_confidence,
            prune_policy: config.memory.prune_policy(),
        };
        let memory =
            MemoryStore::new(stores.memory, embeddings, options).with_events(events.clone());

        let context = Arc::new(ContextAssembler::new(
            memory,
            stores.history,
            stores.knowledge,
            ContextSettings::from_config(&config),
        ));
        let brain = Arc::new(
            TieredBrain::new(backend, BrainSettings::from_config(&config))
                .with_context(context.clone())
                .with_usage_tracker(usage.clone()),
        );

        let router = Arc::new(
            MessageRouter::new(brain.clone(), context.clone(), audit.clone())
                .with_config(&config)
                .with_events(events.clone()),
        );
        let web = Arc::new(WebChannel::new());
        router.register_adapter(web.clone());

        let executor = Arc::new(
            PlanExecutor::new(brain.clone(), runner)
                .with_config(&config)
                .with_events(events.clone()),
        );

        Self {
            config,
            context,
            brain,
            router,
            web,
            commands: Arc::new(CommandRegistry::new()),
            executor,
            usage,
            audit,
            events,
            started_at: chrono::Utc::now(),
        }
    }

    pub fn memory(&self) -> &MemoryStore {
        self.context.memory()
    }
}
