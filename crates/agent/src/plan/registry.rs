//! In-memory command lifecycle tracking.
//!
//! `pending → analyzed → approved → executing → completed`. Transitions out
//! of order are rejected, which is what keeps a plan from running twice.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::executor::StepResult;
use super::ExecutionPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Analyzed,
    Approved,
    Executing,
    Completed,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Analyzed => "analyzed",
            CommandStatus::Approved => "approved",
            CommandStatus::Executing => "executing",
            CommandStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRecord {
    pub id: String,
    pub sender: String,
    pub channel: String,
    pub text: String,
    pub status: CommandStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<ExecutionPlan>,
    #[serde(default)]
    pub results: Vec<StepResult>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("command not found: {0}")]
    NotFound(String),

    #[error("command {id} is {actual}, expected {expected}")]
    InvalidTransition {
        id: String,
        expected: &'static str,
        actual: &'static str,
    },
}

/// Commands keyed by id.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: RwLock<HashMap<String, CommandRecord>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending command.
    pub fn create(
        &self,
        sender: impl Into<String>,
        channel: impl Into<String>,
        text: impl Into<String>,
    ) -> CommandRecord {
        let record = CommandRecord {
            id: Uuid::new_v4().to_string(),
            sender: sender.into(),
            channel: channel.into(),
            text: text.into(),
            status: CommandStatus::Pending,
            plan: None,
            results: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
        };
        self.commands
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.id.clone(), record.clone());
        record
    }

    pub fn get(&self, id: &str) -> Option<CommandRecord> {
        self.commands
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    /// All commands, newest first.
    pub fn list(&self) -> Vec<CommandRecord> {
        let mut all: Vec<CommandRecord> = self
            .commands
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Attach the analysis plan: pending → analyzed.
    pub fn set_analysis(&self, id: &str, plan: ExecutionPlan) -> Result<CommandRecord, CommandError> {
        self.transition(id, CommandStatus::Pending, CommandStatus::Analyzed, |r| {
            r.plan = Some(plan);
        })
    }

    /// analyzed → approved.
    pub fn approve(&self, id: &str) -> Result<CommandRecord, CommandError> {
        self.transition(id, CommandStatus::Analyzed, CommandStatus::Approved, |_| {})
    }

    /// approved → executing.
    pub fn begin_execution(&self, id: &str) -> Result<CommandRecord, CommandError> {
        self.transition(id, CommandStatus::Approved, CommandStatus::Executing, |_| {})
    }

    /// executing → completed, storing the step results.
    pub fn complete(&self, id: &str, results: Vec<StepResult>) -> Result<CommandRecord, CommandError> {
        self.transition(id, CommandStatus::Executing, CommandStatus::Completed, |r| {
            r.results = results;
            r.completed_at = Some(Utc::now());
        })
    }

    fn transition(
        &self,
        id: &str,
        from: CommandStatus,
        to: CommandStatus,
        update: impl FnOnce(&mut CommandRecord),
    ) -> Result<CommandRecord, CommandError> {
        let mut commands = self.commands.write().unwrap_or_else(|e| e.into_inner());
        let record = commands
            .get_mut(id)
            .ok_or_else(|| CommandError::NotFound(id.to_string()))?;
        if record.status != from {
            return Err(CommandError::InvalidTransition {
                id: id.to_string(),
                expected: from.as_str(),
                actual: record.status.as_str(),
            });
        }
        update(record);
        record.status = to;
        Ok(record.clone())
    }
}
