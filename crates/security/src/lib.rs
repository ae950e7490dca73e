//! Security module for OpsClaw: sender allowlists and audit logging.
//!
//! Provides:
//! - **Allowlists**: Sender validation per channel
//! - **Audit logging**: Structured records of routed messages and operator actions

pub mod allowlist;
pub mod audit;

pub use allowlist::{AllowlistPolicy, SenderCheckResult};
pub use audit::{AuditLogger, AuditRecord, AuditSink, AuditSinkError, TracingSink};
