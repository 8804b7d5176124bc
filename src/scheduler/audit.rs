use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scheduler::job::JobId;

/// Operator recorded for transitions nobody asked for directly.
pub const SYSTEM_OPERATOR: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    Submit,
    Approve,
    Reject,
    Cancel,
    Queue,
    Start,
    Finish,
}

impl std::fmt::Display for AuditOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditOperation::Submit => write!(f, "submit"),
            AuditOperation::Approve => write!(f, "approve"),
            AuditOperation::Reject => write!(f, "reject"),
            AuditOperation::Cancel => write!(f, "cancel"),
            AuditOperation::Queue => write!(f, "queue"),
            AuditOperation::Start => write!(f, "start"),
            AuditOperation::Finish => write!(f, "finish"),
        }
    }
}

/// One immutable line of a job's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Position in the global log; strictly increasing.
    pub seq: u64,
    pub audit_id: u64,
    pub job_id: JobId,
    pub operation: AuditOperation,
    pub description: String,
    pub operator: String,
    pub created_at: DateTime<Utc>,
}
