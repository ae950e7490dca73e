//! `opsclaw serve`: start the HTTP API server.

use std::path::Path;

pub async fn run(config_path: Option<&Path>, port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config(config_path)?;
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("🦀 OpsClaw Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Auth:      {}", if config.api_key.is_some() { "bearer key" } else { "open" });
    println!("   Memory:    {}", config.memory.backend);

    opsclaw_gateway::start(config).await
}
