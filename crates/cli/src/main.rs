//! OpsClaw CLI: the main entry point.
//!
//! Commands:
//! - `serve`    Start the HTTP gateway
//! - `chat`     Interactive chat through the message router
//! - `ask`      One prompt straight to the tiered brain
//! - `memory`   Inspect and maintain the memory store
//! - `command`  Analyze an operator command into an execution plan
//! - `config`   Show, validate or locate the configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "opsclaw",
    about = "OpsClaw: AI operations agent orchestration core",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.opsclaw/config.toml)
    #[arg(short, long, global = true, env = "OPSCLAW_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Chat interactively through the message router
    Chat,

    /// Send one prompt to the model tiers and print the answer
    Ask {
        prompt: String,

        /// low, high or auto
        #[arg(short = 'x', long, default_value = "auto")]
        complexity: String,
    },

    /// Memory store maintenance
    Memory {
        #[command(subcommand)]
        action: commands::memory::MemoryAction,
    },

    /// Operator command analysis
    Command {
        #[command(subcommand)]
        action: commands::command::CommandAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config_cmd::ConfigAction,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Serve { port } => commands::serve::run(config_path, port).await?,
        Commands::Chat => commands::chat::run(config_path).await?,
        Commands::Ask { prompt, complexity } => {
            commands::ask::run(config_path, &prompt, &complexity, cli.verbose).await?
        }
        Commands::Memory { action } => commands::memory::run(config_path, action).await?,
        Commands::Command { action } => commands::command::run(config_path, action).await?,
        Commands::Config { action } => commands::config_cmd::run(config_path, action).await?,
    }

    Ok(())
}
