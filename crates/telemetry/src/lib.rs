//! Model usage and cost tracking for OpsClaw.
//!
//! Every model call the brain makes produces a [`UsageRecord`] with token
//! counts and an estimated cost derived from the tier's per-1k price.
//! Trackers aggregate records into a [`UsageSummary`] with a per-model
//! breakdown.

pub mod model;
pub mod tracker;

pub use model::{ModelUsage, UsageRecord, UsageSummary, estimate_cost, provider_of};
pub use tracker::{InMemoryUsageTracker, UsageTracker};

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("usage storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}
