//! Configuration loading, validation, and management for OpsClaw.
//!
//! Loads configuration from `~/.opsclaw/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use opsclaw_core::memory::PrunePolicy;

/// The root configuration structure.
///
/// Maps directly to `~/.opsclaw/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Fixed system instructions placed first in every prompt
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Bearer key required by the HTTP gateway (none = open)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model tiers and routing heuristics
    #[serde(default)]
    pub brain: BrainConfig,

    /// Provider-specific configurations, keyed by provider prefix
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Memory configuration
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Prompt budget configuration
    #[serde(default)]
    pub context: ContextConfig,

    /// Channel configurations, keyed by channel name
    #[serde(default)]
    pub channels: HashMap<String, ChannelConfig>,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Plan execution limits
    #[serde(default)]
    pub plan: PlanConfig,

    /// In-process audit trail
    #[serde(default)]
    pub audit: AuditConfig,
}

fn default_system_prompt() -> String {
    "You are OpsClaw, an AI operations agent for a small production platform.\n\
     \n\
     RULES:\n\
     - Explain what you are about to do before doing it.\n\
     - Destructive operations (delete, drop, modify configs) always need approval.\n\
     - Read-only operations (status, logs, tests) may run automatically.\n\
     - Be concise but thorough. When in doubt, ask rather than act."
        .into()
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("system_prompt_len", &self.system_prompt.len())
            .field("api_key", &redact(&self.api_key))
            .field("brain", &self.brain)
            .field("providers", &self.providers)
            .field("memory", &self.memory)
            .field("context", &self.context)
            .field("channels", &self.channels)
            .field("gateway", &self.gateway)
            .field("plan", &self.plan)
            .field("audit", &self.audit)
            .finish()
    }
}

/// One capability/cost class of models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    /// 1 = cheapest/fastest, ascending
    pub level: u8,

    #[serde(default)]
    pub name: String,

    /// Candidate models in failover order, as "provider/model"
    pub models: Vec<String>,

    #[serde(default = "default_tier_max_tokens")]
    pub max_tokens: u32,

    /// Routing keywords (bottom tier: simple operations, top tier: complex work)
    #[serde(default)]
    pub keywords: Vec<String>,

    /// USD per 1000 tokens (input + output)
    #[serde(default)]
    pub cost_per_1k: f64,
}

fn default_tier_max_tokens() -> u32 {
    4096
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainConfig {
    #[serde(default = "default_tiers")]
    pub tiers: Vec<TierConfig>,

    /// Prompts estimated above this many tokens go to the top tier
    #[serde(default = "default_high_token_threshold")]
    pub high_token_threshold: usize,

    /// "Short" for the bottom-tier rule
    #[serde(default = "default_simple_max_tokens")]
    pub simple_max_tokens: usize,

    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Returned when every candidate in every tier failed
    #[serde(default = "default_unavailable_message")]
    pub unavailable_message: String,
}

fn default_tiers() -> Vec<TierConfig> {
    vec![
        TierConfig {
            level: 1,
            name: "local".into(),
            models: vec!["ollama/qwen2.5:7b".into()],
            max_tokens: 1024,
            keywords: [
                "restart", "status", "check", "ping", "uptime", "list", "show", "logs",
            ]
            .map(String::from)
            .to_vec(),
            cost_per_1k: 0.0,
        },
        TierConfig {
            level: 2,
            name: "standard".into(),
            models: vec![
                "openrouter/openai/gpt-4o-mini".into(),
                "openai/gpt-4o-mini".into(),
            ],
            max_tokens: 2048,
            keywords: Vec::new(),
            cost_per_1k: 0.0006,
        },
        TierConfig {
            level: 3,
            name: "advanced".into(),
            models: vec![
                "openrouter/anthropic/claude-sonnet-4".into(),
                "openai/gpt-4o".into(),
            ],
            max_tokens: 4096,
            keywords: [
                "fix",
                "debug",
                "refactor",
                "analyze",
                "write code",
                "migration",
                "deploy",
                "security",
                "research",
                "summarize article",
                "strategy",
                "plan",
                "architecture",
            ]
            .map(String::from)
            .to_vec(),
            cost_per_1k: 0.01,
        },
    ]
}
fn default_high_token_threshold() -> usize {
    500
}
fn default_simple_max_tokens() -> usize {
    50
}
fn default_call_timeout() -> u64 {
    60
}
fn default_temperature() -> f32 {
    0.3
}
fn default_unavailable_message() -> String {
    "All model backends are currently unavailable. Please try again shortly.".into()
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            tiers: default_tiers(),
            high_token_threshold: default_high_token_threshold(),
            simple_max_tokens: default_simple_max_tokens(),
            call_timeout_secs: default_call_timeout(),
            temperature: default_temperature(),
            unavailable_message: default_unavailable_message(),
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Overrides the provider's well-known base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// "sqlite" or "memory"
    #[serde(default = "default_memory_backend")]
    pub backend: String,

    /// SQLite database file; defaults to `~/.opsclaw/opsclaw.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,

    /// Provider prefix for embeddings, or "none"
    #[serde(default = "default_embedding_provider")]
    pub embedding_provider: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,

    /// Fused score above which a new memory merges into its top hit
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: f64,

    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,

    #[serde(default = "default_confidence")]
    pub default_confidence: f32,

    #[serde(default = "default_decay_factor")]
    pub decay_factor: f32,

    #[serde(default = "default_decay_after_days")]
    pub decay_after_days: i64,

    #[serde(default = "default_prune_below")]
    pub prune_below_confidence: f32,

    #[serde(default = "default_prune_after_days")]
    pub prune_after_days: i64,
}

fn default_memory_backend() -> String {
    "sqlite".into()
}
fn default_embedding_provider() -> String {
    "none".into()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".into()
}
fn default_embedding_dimensions() -> usize {
    768
}
fn default_duplicate_threshold() -> f64 {
    0.03
}
fn default_rrf_k() -> f64 {
    60.0
}
fn default_confidence() -> f32 {
    0.5
}
fn default_decay_factor() -> f32 {
    0.95
}
fn default_decay_after_days() -> i64 {
    30
}
fn default_prune_below() -> f32 {
    0.1
}
fn default_prune_after_days() -> i64 {
    90
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            db_path: None,
            embedding_provider: default_embedding_provider(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dimensions(),
            duplicate_threshold: default_duplicate_threshold(),
            rrf_k: default_rrf_k(),
            default_confidence: default_confidence(),
            decay_factor: default_decay_factor(),
            decay_after_days: default_decay_after_days(),
            prune_below_confidence: default_prune_below(),
            prune_after_days: default_prune_after_days(),
        }
    }
}

impl MemoryConfig {
    pub fn prune_policy(&self) -> PrunePolicy {
        PrunePolicy {
            decay_factor: self.decay_factor,
            decay_after: chrono::Duration::days(self.decay_after_days),
            prune_below: self.prune_below_confidence,
            prune_after: chrono::Duration::days(self.prune_after_days),
        }
    }

    /// The database path, falling back to the config directory.
    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| AppConfig::config_dir().join("opsclaw.db"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Whole-prompt token budget
    #[serde(default = "default_context_tokens")]
    pub max_tokens: usize,

    /// Turns of history fetched per request
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,

    /// Tokens held back for the model's answer
    #[serde(default = "default_response_reserve")]
    pub response_reserve: usize,

    #[serde(default = "default_memory_limit")]
    pub memory_limit: usize,

    #[serde(default = "default_knowledge_limit")]
    pub knowledge_limit: usize,
}

fn default_context_tokens() -> usize {
    8000
}
fn default_history_turns() -> usize {
    10
}
fn default_response_reserve() -> usize {
    500
}
fn default_memory_limit() -> usize {
    5
}
fn default_knowledge_limit() -> usize {
    5
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_context_tokens(),
            history_turns: default_history_turns(),
            response_reserve: default_response_reserve(),
            memory_limit: default_memory_limit(),
            knowledge_limit: default_knowledge_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sender ids allowed to talk to the agent; empty = everyone
    #[serde(default)]
    pub allowed_users: Vec<String>,

    /// Overrides the per-channel chunk ceiling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_message_length: Option<usize>,

    /// Channel-specific settings (tokens, sidecar URLs, ...)
    #[serde(flatten)]
    pub settings: HashMap<String, serde_json::Value>,
}

fn default_true() -> bool {
    true
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_users: Vec::new(),
            max_message_length: None,
            settings: HashMap::new(),
        }
    }
}

/// Built-in chunk ceiling for a channel.
pub fn default_max_message_length(channel: &str) -> usize {
    match channel {
        "telegram" | "whatsapp" => 4000,
        "web" => 100_000,
        _ => 4000,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Seconds the web channel waits for a routed response
    #[serde(default = "default_response_timeout")]
    pub response_timeout_secs: u64,
}

fn default_port() -> u16 {
    42617
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_response_timeout() -> u64 {
    60
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            response_timeout_secs: default_response_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,

    /// Characters of stdout/stderr kept per step (the tail)
    #[serde(default = "default_output_tail")]
    pub output_tail_chars: usize,
}

fn default_step_timeout() -> u64 {
    60
}
fn default_output_tail() -> usize {
    500
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_step_timeout(),
            output_tail_chars: default_output_tail(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Records kept in the in-process ring buffer
    #[serde(default = "default_audit_capacity")]
    pub capacity: usize,
}

fn default_audit_capacity() -> usize {
    1000
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            capacity: default_audit_capacity(),
        }
    }
}

/// Channels whose allow-lists may be set from `OPSCLAW_<CHANNEL>_ALLOWED`.
const ENV_CHANNELS: [&str; 4] = ["web", "telegram", "whatsapp", "cli"];

impl AppConfig {
    /// Load configuration from the default path (~/.opsclaw/config.toml),
    /// then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path)
    }

    /// Load from `path`, apply environment overrides, and validate.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup` (injectable for tests).
    ///
    /// - `OPSCLAW_API_KEY`, `OPSCLAW_DB_PATH`, `OPSCLAW_GATEWAY_PORT`, `OPSCLAW_SYSTEM_PROMPT`
    /// - `OPENAI_API_KEY`, `OPENROUTER_API_KEY`, `ANTHROPIC_API_KEY` fill missing provider keys
    /// - `OLLAMA_BASE_URL` overrides the ollama endpoint
    /// - `OPSCLAW_<CHANNEL>_ALLOWED` is a comma-separated allow-list
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("OPSCLAW_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(path) = lookup("OPSCLAW_DB_PATH") {
            self.memory.db_path = Some(path);
        }
        if let Some(port) = lookup("OPSCLAW_GATEWAY_PORT") {
            match port.parse() {
                Ok(port) => self.gateway.port = port,
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid OPSCLAW_GATEWAY_PORT"),
            }
        }
        if let Some(prompt) = lookup("OPSCLAW_SYSTEM_PROMPT") {
            self.system_prompt = prompt;
        }

        for (provider, var) in [
            ("openai", "OPENAI_API_KEY"),
            ("openrouter", "OPENROUTER_API_KEY"),
            ("anthropic", "ANTHROPIC_API_KEY"),
        ] {
            if let Some(key) = lookup(var) {
                let entry = self.providers.entry(provider.to_string()).or_default();
                if entry.api_key.is_none() {
                    entry.api_key = Some(key);
                }
            }
        }
        if let Some(url) = lookup("OLLAMA_BASE_URL") {
            self.providers.entry("ollama".into()).or_default().api_url = Some(url);
        }

        for channel in ENV_CHANNELS {
            let var = format!("OPSCLAW_{}_ALLOWED", channel.to_ascii_uppercase());
            if let Some(list) = lookup(&var) {
                let users = list
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
                self.channels.entry(channel.into()).or_default().allowed_users = users;
            }
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".opsclaw")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.brain.tiers.is_empty() {
            return Err(ConfigError::ValidationError(
                "brain.tiers must define at least one tier".into(),
            ));
        }

        let mut levels: Vec<u8> = self.brain.tiers.iter().map(|t| t.level).collect();
        levels.sort_unstable();
        if levels.windows(2).any(|w| w[0] == w[1]) {
            return Err(ConfigError::ValidationError(
                "brain.tiers contains duplicate levels".into(),
            ));
        }

        if let Some(tier) = self.brain.tiers.iter().find(|t| t.models.is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "tier {} has no candidate models",
                tier.level
            )));
        }

        if !(0.0..=2.0).contains(&self.brain.temperature) {
            return Err(ConfigError::ValidationError(
                "brain.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.memory.duplicate_threshold) {
            return Err(ConfigError::ValidationError(
                "memory.duplicate_threshold must be between 0.0 and 1.0".into(),
            ));
        }

        if self.context.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "context.max_tokens must be > 0".into(),
            ));
        }

        if self.gateway.port == 0 {
            return Err(ConfigError::ValidationError("gateway.port must be > 0".into()));
        }

        Ok(())
    }

    /// Tiers sorted ascending by level.
    pub fn sorted_tiers(&self) -> Vec<TierConfig> {
        let mut tiers = self.brain.tiers.clone();
        tiers.sort_by_key(|t| t.level);
        tiers
    }

    /// Allow-list for a channel (empty = everyone).
    pub fn allowed_users(&self, channel: &str) -> &[String] {
        self.channels
            .get(channel)
            .map(|c| c.allowed_users.as_slice())
            .unwrap_or(&[])
    }

    /// Chunk ceiling for a channel: configured override or built-in default.
    pub fn max_message_length(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .and_then(|c| c.max_message_length)
            .unwrap_or_else(|| default_max_message_length(channel))
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            api_key: None,
            brain: BrainConfig::default(),
            providers: HashMap::new(),
            memory: MemoryConfig::default(),
            context: ContextConfig::default(),
            channels: HashMap::new(),
            gateway: GatewayConfig::default(),
            plan: PlanConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.brain.tiers.len(), 3);
        assert_eq!(config.context.max_tokens, 8000);
        assert_eq!(config.memory.duplicate_threshold, 0.03);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.gateway.port, config.gateway.port);
        assert_eq!(parsed.brain.tiers[2].keywords, config.brain.tiers[2].keywords);
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.plan.step_timeout_secs, 60);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
system_prompt = "be brief"

[context]
max_tokens = 2000

[channels.telegram]
allowed_users = ["111", "222"]
bot_token = "abc"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.system_prompt, "be brief");
        assert_eq!(config.context.max_tokens, 2000);
        assert_eq!(config.context.history_turns, 10);
        assert_eq!(config.allowed_users("telegram"), ["111", "222"]);
        assert!(config.allowed_users("web").is_empty());
        assert_eq!(
            config.channels["telegram"].settings.get("bot_token"),
            Some(&serde_json::json!("abc"))
        );
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[context\nmax_tokens = ").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn validation_rejects_bad_tiers() {
        let mut config = AppConfig::default();
        config.brain.tiers[1].level = 1;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.brain.tiers[0].models.clear();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.brain.tiers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_bad_threshold_and_budget() {
        let mut config = AppConfig::default();
        config.memory.duplicate_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.context.max_tokens = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("OPSCLAW_API_KEY", "gw-key"),
            ("OPSCLAW_GATEWAY_PORT", "9000"),
            ("OPENAI_API_KEY", "sk-test"),
            ("OLLAMA_BASE_URL", "http://gpu-box:11434/v1"),
            ("OPSCLAW_WHATSAPP_ALLOWED", "256700000001, 256700000002,"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.api_key.as_deref(), Some("gw-key"));
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.providers["openai"].api_key.as_deref(), Some("sk-test"));
        assert_eq!(
            config.providers["ollama"].api_url.as_deref(),
            Some("http://gpu-box:11434/v1")
        );
        assert_eq!(
            config.allowed_users("whatsapp"),
            ["256700000001", "256700000002"]
        );
    }

    #[test]
    fn env_does_not_replace_configured_provider_key() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "openai".into(),
            ProviderConfig {
                api_key: Some("from-file".into()),
                api_url: None,
            },
        );
        config.apply_env_overrides(|k| (k == "OPENAI_API_KEY").then(|| "from-env".to_string()));
        assert_eq!(config.providers["openai"].api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn message_length_defaults_and_override() {
        let mut config = AppConfig::default();
        assert_eq!(config.max_message_length("telegram"), 4000);
        assert_eq!(config.max_message_length("web"), 100_000);
        assert_eq!(config.max_message_length("sms"), 4000);

        config.channels.insert(
            "telegram".into(),
            ChannelConfig {
                max_message_length: Some(1000),
                ..ChannelConfig::default()
            },
        );
        assert_eq!(config.max_message_length("telegram"), 1000);
    }

    #[test]
    fn debug_redacts_keys() {
        let mut config = AppConfig {
            api_key: Some("super-secret".into()),
            ..AppConfig::default()
        };
        config.providers.insert(
            "openai".into(),
            ProviderConfig {
                api_key: Some("sk-secret".into()),
                api_url: None,
            },
        );
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
