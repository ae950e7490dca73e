//! `opsclaw config`: configuration management.

use std::path::Path;

use clap::Subcommand;
use opsclaw_config::AppConfig;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration (secrets redacted)
    Show,
    /// Load and validate the configuration
    Validate,
    /// Print the default config file location
    Path,
    /// Print a config file with every default filled in
    Default,
}

pub async fn run(config_path: Option<&Path>, action: ConfigAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ConfigAction::Show => {
            let config = super::load_config(config_path)?;
            println!("{}", toml::to_string_pretty(&redacted(config))?);
        }
        ConfigAction::Validate => validate(config_path)?,
        ConfigAction::Path => {
            println!("{}", AppConfig::config_dir().join("config.toml").display());
        }
        ConfigAction::Default => println!("{}", AppConfig::default_toml()),
    }
    Ok(())
}

fn validate(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");
    let config = super::load_config(config_path)?;
    println!("   ✅ Config parsed and validated");

    let mut warnings = Vec::new();
    if config.api_key.is_none() {
        warnings.push("No gateway API key set; the HTTP API is unauthenticated".to_string());
    }
    if config.gateway.host == "0.0.0.0" && config.api_key.is_none() {
        warnings.push("Gateway bound to 0.0.0.0 without an API key".to_string());
    }
    for tier in &config.brain.tiers {
        for model in &tier.models {
            if opsclaw_providers::split_model_id(model).is_none() {
                warnings.push(format!("Model '{model}' in tier {} has no provider prefix", tier.level));
            }
        }
    }

    for w in &warnings {
        println!("   ⚠️  {w}");
    }

    println!();
    for tier in config.sorted_tiers() {
        println!("   Tier {} ({}): {}", tier.level, tier.name, tier.models.join(", "));
    }
    println!("   Gateway:   {}:{}", config.gateway.host, config.gateway.port);
    println!("   Memory:    {}", config.memory.backend);
    println!("   Embedding: {}", config.memory.embedding_provider);
    Ok(())
}

/// Replace every secret with a marker before printing.
fn redacted(mut config: AppConfig) -> AppConfig {
    const MARKER: &str = "[REDACTED]";
    if config.api_key.is_some() {
        config.api_key = Some(MARKER.into());
    }
    for provider in config.providers.values_mut() {
        if provider.api_key.is_some() {
            provider.api_key = Some(MARKER.into());
        }
    }
    config
}
