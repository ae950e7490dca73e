//! Subcommand implementations.

pub mod ask;
pub mod chat;
pub mod command;
pub mod config_cmd;
pub mod memory;
pub mod serve;

use std::path::Path;
use std::sync::Arc;

use opsclaw_config::AppConfig;
use opsclaw_gateway::Runtime;

/// Load configuration from `path` or the default location, with
/// environment overrides applied and validation run.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));
    AppConfig::load_with_env(&path).map_err(|e| format!("Failed to load config: {e}").into())
}

/// Load configuration and build the shared runtime.
pub async fn load_runtime(path: Option<&Path>) -> Result<Arc<Runtime>, Box<dyn std::error::Error>> {
    let config = load_config(path)?;
    Ok(Arc::new(Runtime::build(config).await?))
}
