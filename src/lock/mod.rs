//! Per-instance mutual exclusion for benchmark jobs.
//!
//! Every job that wants to run against an instance first places a [`Claim`]
//! in a shared [`LeaseStore`]. The live claims of an instance form its queue,
//! ordered by job id. A claim is admitted when it is the lowest waiting job
//! and nothing else is running on the instance.
//!
//! Claims that are still waiting expire after their TTL; that bound is the
//! queue-wait timeout. Admitted claims never expire on their own: they are
//! released by the engine when the benchmark process exits, or by the
//! recovery sweep when the worker holding them stops heartbeating.

pub mod arbiter;
pub mod memory;
pub mod sweep;

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::Result;
use crate::scheduler::{InstanceId, JobId};
use crate::worker::WorkerId;

pub use arbiter::{FairnessArbiter, QueueExit};
pub use memory::MemoryLeaseStore;
pub use sweep::RecoverySweeper;

/// Jobs are serialized per target instance.
pub type ResourceId = InstanceId;

/// Handed out by [`LeaseStore::try_claim`]. Admission and release only act
/// on the claim the token was issued for; a claim re-created for the same
/// job after expiry carries a new nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClaimToken {
    pub resource: ResourceId,
    pub job_id: JobId,
    pub nonce: u64,
}

impl std::fmt::Display for ClaimToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", claim_key(self.resource, self.job_id), self.nonce)
    }
}

/// A job's request to run against a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub resource: ResourceId,
    pub job_id: JobId,
    pub nonce: u64,
    pub holder: WorkerId,
    pub expires_at: Instant,
    pub admitted: bool,
}

impl Claim {
    pub fn new(token: ClaimToken, holder: WorkerId, ttl: Duration) -> Self {
        Self {
            resource: token.resource,
            job_id: token.job_id,
            nonce: token.nonce,
            holder,
            expires_at: Instant::now() + ttl,
            admitted: false,
        }
    }

    pub fn token(&self) -> ClaimToken {
        ClaimToken {
            resource: self.resource,
            job_id: self.job_id,
            nonce: self.nonce,
        }
    }

    pub fn is_held_by(&self, token: &ClaimToken) -> bool {
        self.resource == token.resource && self.job_id == token.job_id && self.nonce == token.nonce
    }

    /// Waiting claims expire; admitted ones are only removed explicitly.
    pub fn is_expired(&self, now: Instant) -> bool {
        !self.admitted && now >= self.expires_at
    }

    /// Key under which the claim is known in logs.
    pub fn key(&self) -> String {
        claim_key(self.resource, self.job_id)
    }
}

pub fn claim_key(resource: ResourceId, job_id: JobId) -> String {
    format!("sysbench-{}-{}", resource, job_id)
}

/// Result of one fairness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The job may run now.
    Admitted,
    /// Another job is ahead or running.
    Waiting,
    /// The caller's claim no longer exists (released, expired, swept or
    /// replaced by a newer claim for the same job).
    Lost,
}

/// Shared claim storage. Every method is a single atomic operation against the
/// store; callers never check-then-set.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Create the claim only if no live claim exists for `(resource, job_id)`.
    /// Returns the token of the new claim, `None` when one already exists.
    async fn try_claim(
        &self,
        resource: ResourceId,
        job_id: JobId,
        holder: WorkerId,
        ttl: Duration,
    ) -> Result<Option<ClaimToken>>;

    /// Job ids of all live claims on `resource`, ascending.
    async fn claims_for(&self, resource: ResourceId) -> Result<Vec<JobId>>;

    /// Admit the token's claim if it is the lowest live claim and no other
    /// claim on the resource is admitted. A token whose claim is gone or was
    /// replaced gets `Lost`.
    async fn try_admit(&self, token: &ClaimToken) -> Result<Admission>;

    /// Remove the token's claim. Releasing an absent or replaced claim is a
    /// no-op.
    async fn release(&self, token: &ClaimToken) -> Result<()>;

    /// Remove whatever claim `job_id` holds on `resource`, for jobs that can
    /// no longer run.
    async fn revoke(&self, resource: ResourceId, job_id: JobId) -> Result<()>;

    /// Record that `worker` is alive.
    async fn heartbeat(&self, worker: WorkerId) -> Result<()>;

    /// Drop expired waiting claims and claims held by workers that stopped
    /// heartbeating. Returns the removed claims.
    async fn sweep(&self) -> Result<Vec<Claim>>;
}
