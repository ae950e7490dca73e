//! Complexity hints and tier selection.

use std::fmt;

use opsclaw_config::TierConfig;
use serde::{Deserialize, Serialize};

use crate::context::token::estimate_tokens;

/// Caller hint for how capable a model the prompt needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    High,
    #[default]
    Auto,
}

impl Complexity {
    /// Lenient parse: anything other than "low" or "high" is `Auto`.
    pub fn parse(hint: &str) -> Self {
        match hint.trim().to_ascii_lowercase().as_str() {
            "low" => Complexity::Low,
            "high" => Complexity::High,
            _ => Complexity::Auto,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Low => "low",
            Complexity::High => "high",
            Complexity::Auto => "auto",
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Complexity {
    fn from(hint: &str) -> Self {
        Self::parse(hint)
    }
}

/// Thresholds for automatic selection.
#[derive(Debug, Clone, Copy)]
pub struct TierThresholds {
    /// Prompts estimated above this go to the top tier.
    pub high_tokens: usize,
    /// Bottom-tier keyword prompts must be at most this long.
    pub simple_max_tokens: usize,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            high_tokens: 500,
            simple_max_tokens: 50,
        }
    }
}

/// Pick the index into `tiers` (sorted cheapest first) to start failover at.
///
/// The top tier's keywords mark complex prompts, the bottom tier's mark
/// simple operations. Keywords match as lowercase substrings.
pub fn select_tier(
    tiers: &[TierConfig],
    prompt: &str,
    complexity: Complexity,
    thresholds: TierThresholds,
) -> usize {
    if tiers.is_empty() {
        return 0;
    }
    let top = tiers.len() - 1;
    match complexity {
        Complexity::Low => return 0,
        Complexity::High => return top,
        Complexity::Auto => {}
    }

    let lowered = prompt.to_lowercase();
    let mentions = |tier: &TierConfig| {
        tier.keywords
            .iter()
            .any(|k| !k.is_empty() && lowered.contains(&k.to_lowercase()))
    };
    let tokens = estimate_tokens(prompt);

    if mentions(&tiers[top]) || tokens > thresholds.high_tokens {
        top
    } else if mentions(&tiers[0]) && tokens <= thresholds.simple_max_tokens {
        0
    } else {
        tiers.len() / 2
    }
}
