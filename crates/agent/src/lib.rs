//! The OpsClaw orchestration core.
//!
//! A message flows through four stages:
//!
//! 1. **Route**: [`MessageRouter`] authorizes the sender, derives the
//!    session and persists the user turn.
//! 2. **Assemble**: [`ContextAssembler`] builds the prompt from system
//!    instructions, relevant memory, infrastructure knowledge and history.
//! 3. **Think**: [`TieredBrain`] picks a tier and fails over across models.
//! 4. **Deliver**: the router chunks the reply for the originating channel
//!    and writes the audit record.
//!
//! Operator commands take a side path through [`plan`]: analysis into an
//! [`ExecutionPlan`], approval, then step-by-step execution.

pub mod brain;
pub mod context;
pub mod plan;
pub mod router;
pub mod tier;

pub use brain::{
    AttemptOutcome, BrainReply, BrainSettings, Candidate, FailedAttempt, SessionRef, TieredBrain,
};
pub use context::{AssembledContext, AssemblyMetadata, ContextAssembler, ContextSettings};
pub use plan::{
    analyze_command, parse_plan, CommandError, CommandRecord, CommandRegistry, CommandRunner,
    CommandStatus, ExecutionPlan, PlanExecutor, Severity, ShellRunner, StepResult, StepStatus,
};
pub use router::{split_message, ChannelStatus, MessageRouter};
pub use tier::{select_tier, Complexity, TierThresholds};
