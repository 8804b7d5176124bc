//! Seams to the approval workflow and the deferred-run timer.
//!
//! Authorization rules live outside this crate; the engine only asks. It
//! applies the status gates itself (a job can only be executed once approved
//! and only cancelled while not terminal), so an [`ApprovalEngine`] answers
//! purely "may this user do this to this job".

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::Result;
use crate::scheduler::{AuditLogEntry, Job, JobId, JobStatus};

/// An authorization answer with a human-readable reason when denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: String,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: String::new(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

#[async_trait]
pub trait ApprovalEngine: Send + Sync {
    /// Whether the approval workflow considers the job approved.
    async fn is_approved(&self, job: &Job) -> Result<bool>;

    async fn can_review(&self, user: &str, job: &Job) -> Result<bool>;

    async fn can_execute(&self, user: &str, job: &Job) -> Result<Decision>;

    async fn can_cancel(&self, user: &str, job: &Job) -> Result<Decision>;

    /// Called after every committed transition with the audit entry it wrote.
    async fn record_transition(&self, _job: &Job, _entry: &AuditLogEntry) -> Result<()> {
        Ok(())
    }
}

/// Reviewers may approve, execute and cancel any job; owners may execute and
/// cancel their own.
#[derive(Debug, Clone, Default)]
pub struct OwnerOrReviewerPolicy {
    reviewers: HashSet<String>,
}

impl OwnerOrReviewerPolicy {
    pub fn new<I, S>(reviewers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            reviewers: reviewers.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_reviewer(&self, user: &str) -> bool {
        self.reviewers.contains(user)
    }

    fn owner_or_reviewer(&self, user: &str, job: &Job, action: &str) -> Decision {
        if user == job.owner || self.is_reviewer(user) {
            Decision::allow()
        } else {
            Decision::deny(format!("{} may not {} job {}", user, action, job.id))
        }
    }
}

#[async_trait]
impl ApprovalEngine for OwnerOrReviewerPolicy {
    async fn is_approved(&self, job: &Job) -> Result<bool> {
        Ok(!matches!(
            job.status,
            JobStatus::PendingApproval | JobStatus::Cancelled
        ))
    }

    async fn can_review(&self, user: &str, _job: &Job) -> Result<bool> {
        Ok(self.is_reviewer(user))
    }

    async fn can_execute(&self, user: &str, job: &Job) -> Result<Decision> {
        Ok(self.owner_or_reviewer(user, job, "execute"))
    }

    async fn can_cancel(&self, user: &str, job: &Job) -> Result<Decision> {
        Ok(self.owner_or_reviewer(user, job, "cancel"))
    }
}

/// Timer triggers for jobs whose schedule is deferred. The timer itself is
/// external; the engine only removes a pending trigger once the job is queued
/// or cancelled by other means.
#[async_trait]
pub trait DeferredTriggers: Send + Sync {
    async fn remove_trigger(&self, job_id: JobId) -> Result<()>;
}

/// Name under which a job's timer trigger is registered.
pub fn trigger_name(job_id: JobId) -> String {
    format!("sysbench-timing-{}", job_id)
}

/// For deployments without a timer service.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDeferredTriggers;

#[async_trait]
impl DeferredTriggers for NoDeferredTriggers {
    async fn remove_trigger(&self, _job_id: JobId) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{BenchParams, InstanceId, NewJob, Schedule};

    fn job() -> Job {
        Job::new(
            JobId(3),
            NewJob {
                instance_id: InstanceId(1),
                owner: "alice".to_string(),
                params: BenchParams {
                    threads: 1,
                    duration_secs: 1,
                    db_name: "db".to_string(),
                    sql_template: "SELECT 1".to_string(),
                    sql_params: Vec::new(),
                    param_delimiter: ",".to_string(),
                    params_sync: false,
                },
                schedule: Schedule::Immediate,
                audit_id: None,
            },
        )
    }

    #[tokio::test]
    async fn owner_and_reviewers_may_act() {
        let policy = OwnerOrReviewerPolicy::new(["rita"]);
        let job = job();

        assert!(policy.can_execute("alice", &job).await.unwrap().allowed);
        assert!(policy.can_cancel("rita", &job).await.unwrap().allowed);
        assert!(!policy.can_review("alice", &job).await.unwrap());

        let denied = policy.can_cancel("mallory", &job).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.reason, "mallory may not cancel job 3");
    }

    #[tokio::test]
    async fn pending_jobs_are_not_approved() {
        let policy = OwnerOrReviewerPolicy::default();
        let mut job = job();
        assert!(!policy.is_approved(&job).await.unwrap());
        job.set_status(JobStatus::Approved);
        assert!(policy.is_approved(&job).await.unwrap());
    }

    #[test]
    fn trigger_names() {
        assert_eq!(trigger_name(JobId(12)), "sysbench-timing-12");
    }
}
