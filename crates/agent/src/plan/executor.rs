//! Step-by-step plan execution.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use opsclaw_config::AppConfig;
use opsclaw_core::event::{DomainEvent, EventBus};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::registry::{CommandError, CommandRegistry};
use crate::brain::TieredBrain;
use crate::tier::Complexity;

const SKIP_PREFIX: &str = "SKIP:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
    Timeout,
    Error,
}

/// Outcome of one plan step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step: String,
    /// The translated shell command, when one was produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub status: StepStatus,
    /// Tail of stdout.
    #[serde(default)]
    pub output: String,
    /// Tail of stderr, or what went wrong.
    #[serde(default)]
    pub error: String,
    /// Why the step was skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StepResult {
    fn new(step: &str, status: StepStatus) -> Self {
        Self {
            step: step.to_string(),
            command: None,
            status,
            output: String::new(),
            error: String::new(),
            reason: None,
        }
    }
}

/// Captured output of a finished command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("command timed out after {0}s")]
    Timeout(u64),

    #[error("failed to spawn command: {0}")]
    Spawn(String),
}

/// Runs one shell command with a deadline.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput, RunnerError>;
}

/// Runs commands through `sh -c` on the local host.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput, RunnerError> {
        debug!(command = %command, "Executing shell command");

        let child = Command::new("sh")
            .args(["-c", command])
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(timeout, child).await {
            Err(_) => Err(RunnerError::Timeout(timeout.as_secs())),
            Ok(Err(e)) => Err(RunnerError::Spawn(e.to_string())),
            Ok(Ok(output)) => Ok(CommandOutput {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
        }
    }
}

/// The last `max_chars` characters of `text`.
pub fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}

/// The translation prompt for one step.
pub fn translation_prompt(step: &str) -> String {
    format!(
        "Translate this plan step into a safe bash command. \
         Only output the command, nothing else. \
         If it's not safe to automate, output 'SKIP: reason'.\n\n\
         Step: {step}"
    )
}

/// Translates approved plan steps into shell commands and runs them.
pub struct PlanExecutor {
    brain: Arc<TieredBrain>,
    runner: Arc<dyn CommandRunner>,
    step_timeout: Duration,
    tail_chars: usize,
    events: Option<Arc<EventBus>>,
}

impl PlanExecutor {
    pub fn new(brain: Arc<TieredBrain>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            brain,
            runner,
            step_timeout: Duration::from_secs(60),
            tail_chars: 500,
            events: None,
        }
    }

    /// Apply `[plan]` settings.
    pub fn with_config(mut self, config: &AppConfig) -> Self {
        self.step_timeout = Duration::from_secs(config.plan.step_timeout_secs);
        self.tail_chars = config.plan.output_tail_chars;
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Run every step in order. A failing step never stops the ones after it.
    pub async fn execute(&self, steps: &[String]) -> Vec<StepResult> {
        let mut results = Vec::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            let result = self.execute_step(step).await;
            info!(step = i + 1, status = ?result.status, "Plan step resolved");
            results.push(result);
        }
        results
    }

    /// Execute an approved command from the registry and mark it completed.
    ///
    /// The registry transition to executing fails for anything not approved,
    /// so a plan can only run once.
    pub async fn run_approved(
        &self,
        registry: &CommandRegistry,
        id: &str,
    ) -> Result<Vec<StepResult>, CommandError> {
        let record = registry.begin_execution(id)?;
        let steps = record.plan.map(|p| p.plan).unwrap_or_default();

        let results = self.execute(&steps).await;
        let failed = results
            .iter()
            .filter(|r| !matches!(r.status, StepStatus::Success | StepStatus::Skipped))
            .count();
        registry.complete(id, results.clone())?;

        info!(command_id = %id, steps = results.len(), failed, "Plan completed");
        if let Some(events) = &self.events {
            events.publish(DomainEvent::PlanCompleted {
                command_id: id.to_string(),
                steps: results.len(),
                failed,
                timestamp: Utc::now(),
            });
        }
        Ok(results)
    }

    async fn execute_step(&self, step: &str) -> StepResult {
        let reply = self
            .brain
            .think_detailed(&translation_prompt(step), Complexity::Low, None)
            .await;
        if reply.is_exhausted() {
            let mut result = StepResult::new(step, StepStatus::Error);
            result.error = reply.text;
            return result;
        }

        let command = reply.text.trim().replace('`', "");
        let command = command.trim();

        if let Some(reason) = command.strip_prefix(SKIP_PREFIX) {
            let mut result = StepResult::new(step, StepStatus::Skipped);
            result.reason = Some(reason.trim().to_string());
            return result;
        }
        if command.is_empty() {
            let mut result = StepResult::new(step, StepStatus::Error);
            result.error = "model returned an empty command".into();
            return result;
        }

        let mut result = StepResult::new(step, StepStatus::Error);
        result.command = Some(command.to_string());

        match self.runner.run(command, self.step_timeout).await {
            Ok(output) => {
                result.status = if output.success() {
                    StepStatus::Success
                } else {
                    warn!(command = %command, exit_code = ?output.exit_code, "Plan step failed");
                    StepStatus::Failed
                };
                result.output = tail(&output.stdout, self.tail_chars);
                result.error = tail(&output.stderr, self.tail_chars);
            }
            Err(RunnerError::Timeout(secs)) => {
                warn!(command = %command, secs, "Plan step timed out");
                result.status = StepStatus::Timeout;
                result.error = format!("timed out after {secs}s");
            }
            Err(e) => {
                warn!(command = %command, "Plan step errored: {e}");
                result.error = e.to_string();
            }
        }
        result
    }
}
