//! `opsclaw memory`: inspect and maintain the memory store.

use std::path::Path;

use clap::Subcommand;
use opsclaw_core::memory::{MemoryCategory, NewMemory};

#[derive(Subcommand)]
pub enum MemoryAction {
    /// Store a memory (merged into a near-duplicate when one exists)
    Remember {
        content: String,

        /// fact, preference, procedure or observation
        #[arg(short, long, default_value = "fact")]
        category: String,

        #[arg(long)]
        confidence: Option<f32>,

        #[arg(long)]
        source: Option<String>,
    },

    /// Hybrid search
    Search {
        query: String,

        #[arg(short, long, default_value_t = 10)]
        limit: usize,

        #[arg(short, long)]
        category: Option<String>,
    },

    /// Expire, decay and prune stale memories
    Prune,

    /// Show store statistics
    Stats,

    /// Mark a memory as verified (confidence 1.0)
    Verify { id: String },

    /// Delete a memory
    Forget { id: String },
}

pub async fn run(config_path: Option<&Path>, action: MemoryAction) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = super::load_runtime(config_path).await?;
    let memory = runtime.memory();

    match action {
        MemoryAction::Remember {
            content,
            category,
            confidence,
            source,
        } => {
            let category: MemoryCategory = category.parse()?;
            let mut new = NewMemory::new(content, category);
            if let Some(confidence) = confidence {
                new = new.with_confidence(confidence);
            }
            if let Some(source) = source {
                new = new.with_source(source);
            }
            let outcome = memory.store(new).await?;
            if outcome.merged {
                println!("🔁 Merged into existing memory {}", outcome.id);
            } else {
                println!("💾 Stored memory {}", outcome.id);
            }
        }
        MemoryAction::Search {
            query,
            limit,
            category,
        } => {
            let category = category.map(|c| c.parse::<MemoryCategory>()).transpose()?;
            let hits = memory.search(&query, limit, category, 0.0).await?;
            if hits.is_empty() {
                println!("No memories match \"{query}\".");
            }
            for hit in hits {
                println!(
                    "{}  [{}] {:.0}%  {}",
                    hit.record.id,
                    hit.record.category,
                    hit.record.confidence * 100.0,
                    hit.record.content
                );
            }
        }
        MemoryAction::Prune => {
            let report = memory.prune().await?;
            println!("🧹 Memory maintenance");
            println!("   Expired deleted:        {}", report.expired_deleted);
            println!("   Decayed:                {}", report.decayed);
            println!("   Low confidence deleted: {}", report.low_confidence_deleted);
        }
        MemoryAction::Stats => {
            let stats = memory.stats().await?;
            println!("🧠 Memory statistics");
            println!("   Total:          {}", stats.total);
            println!("   Verified:       {}", stats.verified);
            println!("   Expired:        {}", stats.expired);
            println!("   Expiring soon:  {}", stats.expiring_soon);
            println!("   With embedding: {}", stats.with_embedding);
            println!("   Avg confidence: {:.2}", stats.average_confidence);
            for (category, count) in &stats.by_category {
                println!("   {category:<15} {count}");
            }
        }
        MemoryAction::Verify { id } => {
            memory.verify(&id).await?;
            println!("✅ Verified {id}");
        }
        MemoryAction::Forget { id } => {
            if memory.delete(&id).await? {
                println!("🗑️  Deleted {id}");
            } else {
                return Err(format!("memory {id} not found").into());
            }
        }
    }

    Ok(())
}
