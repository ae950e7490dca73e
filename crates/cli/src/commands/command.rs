//! `opsclaw command`: analyze operator commands.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use opsclaw_agent::analyze_command;

#[derive(Subcommand)]
pub enum CommandAction {
    /// Ask the top tier for an execution plan (nothing is executed)
    Analyze {
        text: String,

        /// JSON file describing current server state
        #[arg(long)]
        context: Option<PathBuf>,

        /// Log file whose last lines are included
        #[arg(long)]
        logs: Option<PathBuf>,
    },
}

pub async fn run(config_path: Option<&Path>, action: CommandAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        CommandAction::Analyze { text, context, logs } => {
            let server_context = context
                .map(|path| -> Result<serde_json::Value, Box<dyn std::error::Error>> {
                    Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
                })
                .transpose()?;
            let recent_logs: Vec<String> = match logs {
                Some(path) => std::fs::read_to_string(path)?
                    .lines()
                    .map(String::from)
                    .collect(),
                None => Vec::new(),
            };

            let runtime = super::load_runtime(config_path).await?;
            let plan = analyze_command(&runtime.brain, &text, server_context.as_ref(), &recent_logs).await;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
    }
    Ok(())
}
