//! `opsclaw ask`: one prompt straight to the model tiers.

use std::path::Path;

use opsclaw_agent::Complexity;

pub async fn run(
    config_path: Option<&Path>,
    prompt: &str,
    complexity: &str,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = super::load_runtime(config_path).await?;
    let complexity = Complexity::parse(complexity);

    let reply = runtime.brain.think_detailed(prompt, complexity, None).await;
    println!("{}", reply.text);

    if verbose {
        eprintln!();
        eprintln!("   tier:  {}", reply.selected_tier);
        eprintln!("   model: {}", reply.model().unwrap_or("none"));
        for failure in reply.outcome.failures() {
            eprintln!("   failed: {} ({})", failure.model, failure.error);
        }
    }

    if reply.is_exhausted() {
        return Err("all model tiers failed".into());
    }
    Ok(())
}
