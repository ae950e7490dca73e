//! `opsclaw chat`: interactive chat through the message router.
//!
//! Messages take the same path as any other channel: allow-list, session,
//! memory, history and audit all apply.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use opsclaw_channels::CliChannel;
use opsclaw_core::channel::ChannelAdapter;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = super::load_runtime(config_path).await?;

    let operator = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "operator".into());
    let cli = Arc::new(CliChannel::new(operator));
    runtime.router.register_adapter(cli.clone());
    cli.connect().await?;

    println!("🦀 OpsClaw chat. Type 'exit' to quit.");
    prompt();

    let mut inbox = cli.listen_stdin();
    while let Some(message) = inbox.recv().await {
        // The router prints the reply through the CLI adapter
        runtime.router.route(message).await;
        println!();
        prompt();
    }

    cli.disconnect().await?;
    println!("👋 Bye.");
    Ok(())
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}
