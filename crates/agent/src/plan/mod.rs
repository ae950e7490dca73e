//! Command analysis and plan execution.
//!
//! An operator command is analyzed by the top tier into an
//! [`ExecutionPlan`]. Once approved, [`PlanExecutor`] translates each step
//! into a shell command with a bottom-tier call and runs it.

pub mod executor;
pub mod registry;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::brain::TieredBrain;
use crate::tier::Complexity;

pub use executor::{
    CommandOutput, CommandRunner, PlanExecutor, RunnerError, ShellRunner, StepResult, StepStatus,
};
pub use registry::{CommandError, CommandRecord, CommandRegistry, CommandStatus};

/// Recent log lines included in the analysis prompt.
const MAX_PROMPT_LOGS: usize = 10;
/// Characters of the raw reply kept as the fallback summary.
const FALLBACK_SUMMARY_CHARS: usize = 100;
pub const MANUAL_REVIEW_STEP: &str = "Manual review needed (JSON parse failed)";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Unknown labels are treated as medium.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" => Severity::Low,
            "high" => Severity::High,
            "critical" => Severity::Critical,
            _ => Severity::Medium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(Severity::parse(&label))
    }
}

/// The structured plan a model returns for an operator command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub summary: String,
    #[serde(default)]
    pub severity: Severity,
    /// Ordered, human-readable steps.
    #[serde(default)]
    pub plan: Vec<String>,
    /// True only for safe, read-only operations.
    #[serde(default)]
    pub auto_execute: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<String>,
    #[serde(default)]
    pub risks: Vec<String>,
}

impl ExecutionPlan {
    /// The conservative plan used when the reply cannot be parsed.
    pub fn manual_review(raw: &str) -> Self {
        let head: String = raw.chars().take(FALLBACK_SUMMARY_CHARS).collect();
        Self {
            summary: format!("{head}..."),
            severity: Severity::Medium,
            plan: vec![MANUAL_REVIEW_STEP.to_string()],
            auto_execute: false,
            estimated_time: None,
            risks: Vec::new(),
        }
    }
}

/// Parse a model reply into a plan.
///
/// Tries the whole reply, then the span from the first `{` to the last `}`
/// (models like to wrap JSON in prose or code fences), then falls back to
/// [`ExecutionPlan::manual_review`]. Never fails.
pub fn parse_plan(raw: &str) -> ExecutionPlan {
    if let Ok(plan) = serde_json::from_str::<ExecutionPlan>(raw.trim()) {
        return plan;
    }
    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if start < end {
            if let Ok(plan) = serde_json::from_str::<ExecutionPlan>(&raw[start..=end]) {
                debug!("Extracted plan JSON from surrounding text");
                return plan;
            }
        }
    }
    warn!("Plan reply was not valid JSON; falling back to manual review");
    ExecutionPlan::manual_review(raw)
}

/// Build the analysis prompt. Only the last ten log lines are included.
pub fn analysis_prompt(
    command: &str,
    server_context: Option<&serde_json::Value>,
    recent_logs: &[String],
) -> String {
    let state = server_context
        .and_then(|v| serde_json::to_string_pretty(v).ok())
        .unwrap_or_else(|| "{}".into());
    let tail = &recent_logs[recent_logs.len().saturating_sub(MAX_PROMPT_LOGS)..];
    let logs = serde_json::to_string_pretty(tail).unwrap_or_else(|_| "[]".into());

    format!(
        "Analyze this command and create an execution plan.\n\n\
         COMMAND: {command}\n\n\
         CURRENT SERVER STATE:\n{state}\n\n\
         RECENT ERROR LOGS:\n{logs}\n\n\
         Respond ONLY in JSON with:\n\
         {{\n\
         \x20   \"summary\": \"Brief analysis of what's needed\",\n\
         \x20   \"severity\": \"low|medium|high|critical\",\n\
         \x20   \"plan\": [\"step 1\", \"step 2\", ...],\n\
         \x20   \"auto_execute\": true/false (true only for safe, read-only operations),\n\
         \x20   \"estimated_time\": \"Xm\",\n\
         \x20   \"risks\": [\"any risks\"]\n\
         }}"
    )
}

/// Ask the top tier for an execution plan.
pub async fn analyze_command(
    brain: &TieredBrain,
    command: &str,
    server_context: Option<&serde_json::Value>,
    recent_logs: &[String],
) -> ExecutionPlan {
    let prompt = analysis_prompt(command, server_context, recent_logs);
    let reply = brain.think(&prompt, Complexity::High, None).await;
    parse_plan(&reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN_JSON: &str = r#"{
        "summary": "nginx is down",
        "severity": "high",
        "plan": ["check nginx status", "restart nginx"],
        "auto_execute": false,
        "estimated_time": "2m",
        "risks": ["brief downtime"]
    }"#;

    #[test]
    fn parses_clean_json() {
        let plan = parse_plan(PLAN_JSON);
        assert_eq!(plan.summary, "nginx is down");
        assert_eq!(plan.severity, Severity::High);
        assert_eq!(plan.plan.len(), 2);
        assert_eq!(plan.estimated_time.as_deref(), Some("2m"));
    }

    #[test]
    fn extracts_json_from_code_fence() {
        let raw = format!("Here is the plan:\n```json\n{PLAN_JSON}\n```\nGood luck.");
        let plan = parse_plan(&raw);
        assert_eq!(plan.plan, vec!["check nginx status", "restart nginx"]);
    }

    #[test]
    fn unparseable_reply_needs_manual_review() {
        let raw = "x".repeat(150);
        let plan = parse_plan(&raw);
        assert_eq!(plan.summary, format!("{}...", "x".repeat(100)));
        assert_eq!(plan.plan, vec![MANUAL_REVIEW_STEP]);
        assert!(!plan.auto_execute);
        assert_eq!(plan.severity, Severity::Medium);
    }

    #[test]
    fn broken_braces_need_manual_review() {
        let plan = parse_plan("sure! { not json }");
        assert_eq!(plan.plan, vec![MANUAL_REVIEW_STEP]);
    }

    #[test]
    fn unknown_severity_is_medium() {
        let plan = parse_plan(r#"{"summary": "s", "severity": "urgent"}"#);
        assert_eq!(plan.severity, Severity::Medium);
        assert!(plan.plan.is_empty());
    }

    #[test]
    fn prompt_keeps_last_ten_logs() {
        let logs: Vec<String> = (0..15).map(|i| format!("error line {i}")).collect();
        let context = serde_json::json!({"cpu": "93%"});
        let prompt = analysis_prompt("fix the api", Some(&context), &logs);
        assert!(prompt.contains("COMMAND: fix the api"));
        assert!(prompt.contains("\"cpu\": \"93%\""));
        assert!(!prompt.contains("error line 4\""));
        assert!(prompt.contains("error line 5"));
        assert!(prompt.contains("error line 14"));
    }
}
