//! Job lifecycle state machine.
//!
//! ```text
//! PendingApproval ──> Approved ──┐
//!        │      └──> Scheduled ──┴──> Queued ──> Executing ──> Finished | Failed
//!        │                  │           │  └──> QueueTimedOut       │
//!        └──────────────────┴───────────┴──────> Cancelled <────────┘
//! ```
//!
//! Status changes are applied as conditional updates by the job store: a
//! [`Transition`] names the statuses it may start from, and the store only
//! applies it when the current status is one of them. Once a job is terminal
//! nothing moves it again, which is how a late completion loses against an
//! earlier cancellation.

use serde::{Deserialize, Serialize};

use crate::scheduler::audit::{AuditOperation, SYSTEM_OPERATOR};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    PendingApproval,
    Approved,
    /// Approved, waiting for an external timer before it is queued.
    Scheduled,
    Queued,
    Executing,
    Finished,
    Failed,
    Cancelled,
    QueueTimedOut,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::PendingApproval => write!(f, "pending_approval"),
            JobStatus::Approved => write!(f, "approved"),
            JobStatus::Scheduled => write!(f, "scheduled"),
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Executing => write!(f, "executing"),
            JobStatus::Finished => write!(f, "finished"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
            JobStatus::QueueTimedOut => write!(f, "queue_timed_out"),
        }
    }
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Failed | JobStatus::Cancelled | JobStatus::QueueTimedOut
        )
    }

    /// Approved for execution but not yet queued.
    pub fn is_runnable(self) -> bool {
        matches!(self, JobStatus::Approved | JobStatus::Scheduled)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (PendingApproval, Approved | Scheduled | Cancelled) => true,
            (Approved | Scheduled, Queued | Cancelled) => true,
            (Queued, Executing | Cancelled | QueueTimedOut) => true,
            (Executing, Finished | Failed | Cancelled) => true,
            _ => false,
        }
    }
}

/// A requested status change together with the audit entry it produces.
#[derive(Debug, Clone)]
pub struct Transition {
    /// Statuses the job must currently be in.
    pub expected: Vec<JobStatus>,
    pub to: JobStatus,
    pub operation: AuditOperation,
    pub operator: String,
    pub description: String,
}

impl Transition {
    pub fn new(
        expected: &[JobStatus],
        to: JobStatus,
        operation: AuditOperation,
        operator: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            expected: expected.to_vec(),
            to,
            operation,
            operator: operator.into(),
            description: description.into(),
        }
    }

    /// Same as [`Transition::new`] with the automated operator.
    pub fn system(
        expected: &[JobStatus],
        to: JobStatus,
        operation: AuditOperation,
        description: impl Into<String>,
    ) -> Self {
        Self::new(expected, to, operation, SYSTEM_OPERATOR, description)
    }

    /// Whether a job currently in `current` may take this transition.
    pub fn applies_to(&self, current: JobStatus) -> bool {
        self.expected.contains(&current) && current.can_transition_to(self.to)
    }
}
