use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::lock::{Admission, ClaimToken, LeaseStore};
use crate::scheduler::{JobStatus, JobStore};

/// How a queue wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueExit {
    /// The job holds the resource and may run.
    Admitted,
    /// Someone cancelled the job while it was waiting.
    Cancelled,
    /// The claim expired, or was replaced, before the job reached the head
    /// of the queue.
    TimedOut,
}

/// Polls the lease store until a claimed job is admitted, cancelled or its
/// claim runs out.
#[derive(Clone)]
pub struct FairnessArbiter {
    leases: Arc<dyn LeaseStore>,
    poll_interval: Duration,
}

impl FairnessArbiter {
    pub fn new(leases: Arc<dyn LeaseStore>, poll_interval: Duration) -> Self {
        Self {
            leases,
            poll_interval,
        }
    }

    /// Wait for the turn of the claim behind `token`. The loop only blocks
    /// the calling task.
    pub async fn wait_for_turn(&self, token: &ClaimToken, jobs: &dyn JobStore) -> Result<QueueExit> {
        let (resource, job_id) = (token.resource, token.job_id);
        let mut polls: u64 = 0;
        loop {
            if jobs.get(job_id).await?.status == JobStatus::Cancelled {
                tracing::info!(job_id = %job_id, resource = %resource, "Queue wait ended by cancellation");
                return Ok(QueueExit::Cancelled);
            }

            match self.leases.try_admit(token).await? {
                Admission::Admitted => {
                    tracing::info!(job_id = %job_id, resource = %resource, polls, "Job admitted");
                    return Ok(QueueExit::Admitted);
                }
                Admission::Lost => {
                    // Cancellation releases the claim too; tell the two apart.
                    let status = jobs.get(job_id).await?.status;
                    return Ok(if status == JobStatus::Cancelled {
                        QueueExit::Cancelled
                    } else {
                        tracing::warn!(job_id = %job_id, resource = %resource, polls, "Claim expired while queued");
                        QueueExit::TimedOut
                    });
                }
                Admission::Waiting => {
                    if polls == 0 {
                        let ahead = self.leases.claims_for(resource).await?;
                        tracing::info!(job_id = %job_id, resource = %resource, queue = ?ahead, "Waiting for resource");
                    }
                    polls += 1;
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }
}
